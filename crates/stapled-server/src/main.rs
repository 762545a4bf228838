use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use stapled_ocsp::Certificate;
use stapled_server::{
    Config, DirWatcher, DiskCache, EntryCache, ExitFailer, Responder, StableCache, SystemClock,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// stapled - caching OCSP stapling daemon (RFC 6960)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "stapled")]
struct Cli {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG", default_value = "stapled.yaml")]
    config_path: String,

    /// Validate configuration and exit (doesn't start the daemon)
    #[arg(short, long)]
    validate: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from '{}': {}", cli.config_path, e);
            process::exit(1);
        }
    };

    if cli.validate {
        println!("✓ Configuration validated successfully!");
        println!();
        println!("Configuration summary:");
        println!("  Listen: {}", config.http.addr);
        println!("  Stdout level: {}", config.effective_stdout_level());
        println!(
            "  Disk cache: {}",
            config
                .disk
                .cache_folder
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        );
        println!("  Fetcher timeout: {:?}", config.fetcher.timeout_or_default());
        println!(
            "  Upstream responders: {}",
            config.fetcher.upstream_responders.len()
        );
        println!("  Certificates: {}", config.definitions.certificates.len());
        println!(
            "  Stale responses: {}",
            if config.dont_die_on_stale_response {
                "served"
            } else {
                "refused"
            }
        );
        process::exit(0);
    }

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.tracing_filter())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("stapled v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", cli.config_path);

    let clock = Arc::new(SystemClock);
    let timeout = config.fetcher.timeout_or_default();

    let client = match build_client(&config.fetcher.proxies) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            process::exit(1);
        }
    };

    let mut stable_backings: Vec<Arc<dyn StableCache>> = Vec::new();
    if let Some(folder) = &config.disk.cache_folder {
        stable_backings.push(Arc::new(DiskCache::new(folder.clone(), clock.clone())));
    }

    let mut issuers = Vec::new();
    if let Some(folder) = &config.definitions.issuer_folder {
        let entries = match std::fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to read directory '{}': {}", folder.display(), e);
                process::exit(1);
            }
        };
        for dirent in entries.flatten() {
            let path = dirent.path();
            if path.is_dir() {
                continue;
            }
            match Certificate::from_file(&path) {
                Ok(issuer) => issuers.push(issuer),
                Err(e) => warn!("Failed to read issuer '{}': {}", path.display(), e),
            }
        }
    }

    let cache = Arc::new(EntryCache::new(
        clock.clone(),
        stable_backings,
        client,
        timeout,
        issuers,
        config.supported_hashes.0.clone(),
        StdRng::from_entropy(),
    ));

    info!("Loading certificates");
    let global_upstream = config.fetcher.upstream_responders.clone();
    for def in &config.definitions.certificates {
        let issuer = match &def.issuer {
            Some(path) => match Certificate::from_file(path) {
                Ok(issuer) => Some(issuer),
                Err(e) => {
                    error!("Failed to load issuer '{}': {}", path.display(), e);
                    process::exit(1);
                }
            },
            None => None,
        };
        let responders = if !global_upstream.is_empty() && !def.override_global_upstream {
            global_upstream.clone()
        } else {
            def.responders.clone()
        };

        let result = if let Some(cert_path) = &def.certificate {
            cache
                .add_from_certificate(cert_path, issuer, &responders)
                .await
        } else {
            let (name, serial) = match (&def.name, def.serial_bytes()) {
                (Some(name), Ok(serial)) => (name.clone(), serial),
                (_, Err(e)) => {
                    error!("Invalid certificate definition: {}", e);
                    process::exit(1);
                }
                (None, _) => {
                    error!("Certificate definition has neither certificate nor name");
                    process::exit(1);
                }
            };
            let Some(issuer) = issuer else {
                error!("Definition '{}' uses name/serial and must name an issuer", name);
                process::exit(1);
            };
            cache
                .add_from_serial(name, serial, issuer, &responders)
                .await
        };
        if let Err(e) = result {
            error!("Failed to load entry: {}", e);
            process::exit(1);
        }
    }

    let _monitor = cache.start_monitor(Duration::from_secs(60));

    if let Some(folder) = config.definitions.cert_watch_folder.clone() {
        let cache = cache.clone();
        let upstream = global_upstream.clone();
        tokio::spawn(async move {
            let mut watcher = DirWatcher::new(folder);
            let mut interval = tokio::time::interval(Duration::from_secs(15));
            loop {
                interval.tick().await;
                match watcher.check() {
                    Ok((added, removed)) => {
                        for path in added {
                            if let Err(e) =
                                cache.add_from_certificate(&path, None, &upstream).await
                            {
                                error!(
                                    "Failed to load new certificate '{}': {}",
                                    path.display(),
                                    e
                                );
                            }
                        }
                        for name in removed {
                            if let Err(e) = cache.remove(&name) {
                                error!("Failed to remove entry '{}': {}", name, e);
                            }
                        }
                    }
                    Err(e) => error!("Failed to poll certificate directory: {}", e),
                }
            }
        });
    }

    let responder = Responder::new(
        cache,
        global_upstream,
        config.dont_die_on_stale_response,
        Arc::new(ExitFailer),
    );

    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind '{}': {}", addr, e);
            process::exit(1);
        }
    };

    info!("Running stapled on {}", addr);
    if let Err(e) = axum::serve(listener, responder.router()).await {
        error!("HTTP server died: {}", e);
        process::exit(1);
    }
}

/// One shared client for every outbound fetch; when proxies are configured
/// each request goes through a randomly chosen one.
fn build_client(proxies: &[String]) -> Result<reqwest::Client, Box<dyn std::error::Error>> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30));
    if !proxies.is_empty() {
        let mut urls = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            urls.push(reqwest::Url::parse(proxy)?);
        }
        let rng = Mutex::new(StdRng::from_entropy());
        builder = builder.proxy(reqwest::Proxy::custom(move |_| {
            urls.choose(&mut *rng.lock().unwrap()).cloned()
        }));
    }
    Ok(builder.build()?)
}
