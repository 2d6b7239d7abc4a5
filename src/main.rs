use buttonface::cli::Args;
use buttonface::config::Settings;
use buttonface::control::ButtonControl;
use buttonface::core::event_bus::EventBus;
use buttonface::core::notify::{ConnectionHost, NotificationQueue, NullConnectionHost};
use buttonface::entities::{DefinitionRegistry, EntityDefinition, EntityModel, EntityServices, ListId};
use buttonface::graphics::{CompositeDefinitions, NullRenderer, SomeButtonGraphicsElement};
use buttonface::paths::{self, PathConfig};
use buttonface::variables::VariableStore;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Control id used for the single button the CLI renders
const CLI_CONTROL_ID: &str = "cli";

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
}

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // Determine log level based on verbosity flags
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        // File logging with specified verbosity level
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| paths::data_file("buttonface.log", path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging with specified verbosity level (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse command-line arguments first (needed for log setup)
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }
    init_logging(&args, &path_config)?;
    debug!("Command-line args: {:?}", args);

    let settings = Settings::load(&path_config)?;
    info!("Config path: {}", paths::config_file("buttonface.json", &path_config).display());

    let layers: Vec<SomeButtonGraphicsElement> = read_json(&args.layers)?;
    let variables: VariableStore = match &args.variables {
        Some(path) => read_json(path)?,
        None => VariableStore::new(),
    };
    let composites: CompositeDefinitions = match &args.composites {
        Some(path) => read_json(path)?,
        None => CompositeDefinitions::new(),
    };

    let registry = Arc::new(DefinitionRegistry::new());
    if let Some(path) = &args.definitions {
        let definitions: Vec<EntityDefinition> = read_json(path)?;
        for definition in definitions {
            registry.register(definition);
        }
    }

    // No connections run inside the CLI; notifications go nowhere
    let host: Arc<dyn ConnectionHost> = Arc::new(NullConnectionHost);
    let notifier = NotificationQueue::new(settings.notification_queue_size);
    let dispatcher = if settings.dispatcher_thread {
        Some(notifier.spawn_dispatcher(Arc::clone(&host))?)
    } else {
        None
    };

    let services = EntityServices::with_learn_timeout(
        CLI_CONTROL_ID,
        registry,
        Arc::clone(&host),
        notifier.clone(),
        settings.learn_timeout(),
    );
    let mut control = ButtonControl::new(services, EventBus::new(), layers);
    control.set_only_enabled(settings.only_enabled && !args.all);

    if let Some(path) = &args.feedbacks {
        let models: Vec<EntityModel> = read_json(path)?;
        control.pool_mut().load_list(&ListId::Feedbacks, models, false);
    }
    if let Some(path) = &args.values {
        let values: HashMap<String, HashMap<String, Value>> = read_json(path)?;
        for (connection_id, entity_values) in &values {
            control.pool_mut().update_feedback_values(connection_id, entity_values);
        }
    }

    let parser = variables.parser();
    let output = control.render(&parser, &composites, &NullRenderer);
    let stats = control.cache().stats();
    info!(
        "Rendered {} element(s), {} cached, {} hit(s) / {} miss(es)",
        output.result.elements.len(),
        control.cache().len(),
        stats.hits(),
        stats.misses()
    );

    let json = if args.pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", json);

    control.destroy();
    drop(control);
    match dispatcher {
        Some(handle) => {
            // Dispatcher exits once the last queue handle is dropped
            drop(notifier);
            let _ = handle.join();
        }
        None => {
            notifier.dispatch_pending(host.as_ref());
        }
    }
    Ok(())
}
