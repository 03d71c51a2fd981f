use log::{info, warn};
use roqtune_store::config::{load_persistence_config, persistence_config_path};
use roqtune_store::m3u::{format_duration_seconds, is_valid_m3u, parse_duration_to_seconds, parse_m3u};
use roqtune_store::{AppPersistence, PersistenceConfig, Snapshot};

fn load_config() -> PersistenceConfig {
    match persistence_config_path() {
        Some(path) => load_persistence_config(&path),
        None => {
            warn!("No platform config directory. Using default persistence config");
            PersistenceConfig::default()
        }
    }
}

/// Seeds an empty cached document from an existing playlist file.
async fn import_if_empty(persistence: &AppPersistence, playlist_path: &str) {
    let document = persistence.playlist_documents().get(playlist_path).await;
    if !document.with(|playlist| playlist.is_empty()) {
        return;
    }
    let Ok(content) = tokio::fs::read_to_string(playlist_path).await else {
        return;
    };
    if !is_valid_m3u(&content) {
        warn!("Skipping import of unrecognised playlist. path={}", playlist_path);
        return;
    }
    match document.set(parse_m3u(&content)).await {
        Ok(()) => info!("Imported playlist. path={}", playlist_path),
        Err(err) => warn!("Failed to import playlist. path={} error={}", playlist_path, err),
    }
}

async fn run(config: PersistenceConfig, playlist_paths: Vec<String>) {
    let persistence = AppPersistence::open(&config).await;
    let summary = persistence.preload().await;

    let library = persistence.library().get_snapshot().await;
    let library_seconds: u32 = library
        .tracks
        .iter()
        .filter_map(|track| parse_duration_to_seconds(&track.duration))
        .sum();
    let queue = persistence.queue().get_snapshot().await;

    println!("store: {}", persistence.directory().display());
    println!(
        "library: {} tracks in {} roots, {} total",
        library.item_count(),
        library.roots.len(),
        format_duration_seconds(library_seconds)
    );
    match queue.current_track() {
        Some(track) => println!(
            "queue: {} tracks, current {} - {}{}",
            summary.queued_tracks,
            track.artist,
            track.title,
            if queue.is_playing { " (playing)" } else { "" }
        ),
        None => println!("queue: empty"),
    }
    println!("playlists: {} local", summary.local_playlists);
    println!("hotkeys: {} bound", persistence.hotkeys().with(|hotkeys| hotkeys.len()));

    for playlist_path in &playlist_paths {
        import_if_empty(&persistence, playlist_path).await;
        let document = persistence.playlist_documents().get(playlist_path).await;
        let (songs, suggestions, seconds) = document.with(|playlist| {
            let seconds: i64 = playlist
                .songs
                .iter()
                .map(|song| song.duration)
                .filter(|duration| *duration > 0)
                .sum();
            (playlist.songs.len(), playlist.suggestions.len(), seconds)
        });
        println!(
            "{}: {} songs, {} suggestions, {}",
            playlist_path,
            songs,
            suggestions,
            format_duration_seconds(u32::try_from(seconds).unwrap_or(u32::MAX))
        );
    }

    persistence.flush_all().await;
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Info);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = load_config();
    let playlist_paths: Vec<String> = std::env::args().skip(1).collect();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config, playlist_paths));
    Ok(())
}
