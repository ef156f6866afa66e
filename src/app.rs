use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::acquisition;
use crate::config::{self, Config};
use crate::engine::Engine;
use crate::logging;
use crate::ordering;
use crate::repository::Repository;
use crate::storage::{self, KeyValueStore};
use crate::story::{Story, SystemClock};
use crate::sync::{SyncBridge, Watcher};
use crate::ui;

/// Everything one running instance shares.
pub struct Instance {
    pub config: Config,
    pub store: Arc<storage::Store>,
    pub repo: Arc<Repository>,
}

impl Instance {
    pub fn open(config_file: Option<PathBuf>) -> Result<Self> {
        let config = config::load(config::LoadOptions {
            config_file,
            env_prefix: None,
        })
        .context("load config")?;

        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: config.storage.path.clone(),
            })
            .context("open storage")?,
        );
        let kv: Arc<dyn KeyValueStore> = store.clone();
        let repo = Arc::new(Repository::new(
            kv,
            Arc::new(SystemClock),
            Arc::new(SyncBridge::new()),
            config.storage.key.clone(),
        ));

        Ok(Self {
            config,
            store,
            repo,
        })
    }
}

pub fn run(config_file: Option<PathBuf>) -> Result<()> {
    let ctx = Instance::open(config_file)?;
    if let Err(err) = logging::init(&ctx.config.log) {
        eprintln!("warning: logging disabled: {err:#}");
    }
    info!(version = crate::VERSION, "starting");

    let watcher = Watcher::spawn(
        ctx.store.clone(),
        ctx.repo.bridge().clone(),
        ctx.repo.key(),
        ctx.config.sync.poll_interval,
    )
    .context("start sync watcher")?;

    let engine = Engine::new(ctx.repo.clone(), ui::SlideDeck::default());
    let count = engine.stories().len();
    let status_message = match count {
        0 => "No stories yet. Press a to add one.".to_string(),
        1 => "1 story. Enter to watch.".to_string(),
        n => format!("{n} stories. Enter to watch."),
    };

    let mut model = ui::Model::new(ui::Options {
        engine,
        theme: ctx.config.ui.theme.clone(),
        tick_rate: ctx.config.ui.tick_rate,
        max_size_bytes: ctx.config.acquisition.max_size_bytes,
        status_message,
    });
    let result = model.run();

    drop(watcher);
    info!("stopped");
    result
}

/// Acquires `path` and appends it without starting the UI.
pub fn add(config_file: Option<PathBuf>, path: PathBuf) -> Result<Story> {
    let ctx = Instance::open(config_file)?;
    let src = acquisition::encode_file(&path, ctx.config.acquisition.max_size_bytes)
        .with_context(|| format!("add {}", path.display()))?;
    ctx.repo.add_story(src)
}

/// Live stories in index-strip order.
pub fn list(config_file: Option<PathBuf>) -> Result<Vec<Story>> {
    let ctx = Instance::open(config_file)?;
    let mut stories = ctx.repo.load();
    ordering::index_strip_order(&mut stories);
    Ok(stories)
}
