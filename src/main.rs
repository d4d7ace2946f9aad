use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imagecache::infrastructure::{CliArgs, Command, ConfigStore, ImageCacheConfig};
use imagecache::{CacheKey, ImageController};

fn init_logging(config: &ImageCacheConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> ImageCacheConfig {
    let loaded = ConfigStore::new().and_then(|store| store.load(args.config.as_deref()));
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("Using default configuration: {e}");
        ImageCacheConfig::default()
    });
    config.merge_with_args(args);
    config
}

async fn run(controller: &ImageController, command: Command) -> Result<()> {
    match command {
        Command::Fetch { url, out } => {
            let download = controller
                .fetch(&url)
                .await
                .wrap_err_with(|| format!("failed to fetch {url}"))?;
            let format = download
                .image
                .format()
                .map_or_else(|| "unknown".to_string(), |f| format!("{f:?}").to_lowercase());
            println!(
                "{} ({} bytes, {format}) from {}",
                download.image.key(),
                download.image.len(),
                download.origin
            );

            if let Some(out) = out {
                tokio::fs::write(&out, download.image.bytes())
                    .await
                    .wrap_err_with(|| format!("failed to write {}", out.display()))?;
                info!(path = %out.display(), "Wrote image");
            }
        }
        Command::Import { file, url } => {
            controller
                .import_image(&file, &url)
                .await
                .wrap_err_with(|| format!("failed to import {}", file.display()))?;
            println!("Imported {} as {}", file.display(), CacheKey::from_url(&url));
        }
        Command::Status { url } => {
            let key = CacheKey::from_url(&url);
            let size = controller.disk_data(&url).map(|bytes| bytes.len());
            println!("key:    {key}");
            println!("file:   {}.img", key.file_stem());
            match size {
                Some(size) => println!("disk:   {size} bytes"),
                None => println!("disk:   not cached"),
            }
        }
        Command::Clear => {
            controller.delete_all_images().await?;
            println!("Cleared image cache");
        }
        Command::Usage => {
            let usage = controller.disk_usage().await?;
            println!("{} images, {} bytes", usage.entries, usage.bytes);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args);
    init_logging(&config)?;

    info!(version = imagecache::VERSION, "Starting {}", imagecache::NAME);

    let controller = ImageController::with_http(&config).await?;
    let result = run(&controller, args.command).await;

    let stats = controller.stats();
    if stats.in_flight > 0 {
        warn!(in_flight = stats.in_flight, "Exiting with fetches still in flight");
    }
    info!(memory = %stats.memory, "Done");

    result
}
