use std::{fs, path::PathBuf};

use anyhow::Error;
use schemars::schema_for;

use crate::{
    config::Settings,
    message::Message,
    nodes::{event_manager::EventManagerConfig, interaction::InteractionConfig},
};

/// Write JSON schemas for the settings, the message envelope and every
/// configurable node into `out_dir`.
pub fn write_schema(out_dir: PathBuf) -> Result<Vec<PathBuf>, Error> {
    fs::create_dir_all(&out_dir)?;

    let schemas = [
        ("settings.schema.json", serde_json::to_string_pretty(&schema_for!(Settings))?),
        ("message.schema.json", serde_json::to_string_pretty(&schema_for!(Message))?),
        (
            "node-discordInteraction.schema.json",
            serde_json::to_string_pretty(&schema_for!(InteractionConfig))?,
        ),
        (
            "node-discordEventManager.schema.json",
            serde_json::to_string_pretty(&schema_for!(EventManagerConfig))?,
        ),
    ];

    let mut written = Vec::with_capacity(schemas.len());
    for (file, json) in schemas {
        let path = out_dir.join(file);
        fs::write(&path, json)?;
        written.push(path);
    }
    Ok(written)
}
