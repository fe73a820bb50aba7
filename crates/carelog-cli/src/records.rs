use carelog_core::{
    categories::CategoryRegistry, prompt::PasswordPrompt, storage::KeyValueStore,
};
use carelog_crypto::{CryptError, EncryptionManager, WritePolicy};
use color_eyre::{
    eyre::{bail, WrapErr},
    Result,
};
use tracing::warn;

use crate::{config, storage, vault::unlock_if_enabled};

/// Print the stored value for `category`, unlocking first when encryption is enabled.
pub async fn read(
    category: String,
    config: &config::Config,
    prompt: &dyn PasswordPrompt,
) -> Result<()> {
    let manager = storage::open_manager(config).await?;
    match read_category(&manager, &category, prompt).await? {
        Some(value) => println!("{value}"),
        None => println!("No {category} records yet."),
    }
    Ok(())
}

pub async fn write(
    category: String,
    value: Option<String>,
    config: &config::Config,
    prompt: &dyn PasswordPrompt,
) -> Result<()> {
    let value = match value {
        Some(value) => value,
        None => std::io::read_to_string(std::io::stdin())
            .wrap_err("failed to read value from stdin")?,
    };
    let manager = storage::open_manager(config).await?;
    write_category(
        &manager,
        &category,
        value.trim_end(),
        config.write_while_locked,
        prompt,
    )
    .await?;
    println!("Saved {category}.");
    Ok(())
}

async fn read_category<S: KeyValueStore>(
    manager: &EncryptionManager<S>,
    category: &str,
    prompt: &dyn PasswordPrompt,
) -> Result<Option<String>> {
    ensure_registered(manager.registry(), category)?;
    let session = unlock_if_enabled(manager, prompt).await?;
    Ok(manager.proxy().read(session.as_ref(), category).await?)
}

async fn write_category<S: KeyValueStore>(
    manager: &EncryptionManager<S>,
    category: &str,
    value: &str,
    write_policy: WritePolicy,
    prompt: &dyn PasswordPrompt,
) -> Result<()> {
    ensure_registered(manager.registry(), category)?;
    serde_json::from_str::<serde_json::Value>(value)
        .wrap_err_with(|| format!("{category} value must be valid JSON"))?;

    let session = match unlock_if_enabled(manager, prompt).await {
        Ok(session) => session,
        Err(CryptError::Cancelled) if write_policy == WritePolicy::Plaintext => {
            warn!(category, "unlock cancelled, writing without encryption");
            None
        }
        Err(err) => return Err(err.into()),
    };
    manager
        .proxy()
        .write(session.as_ref(), category, value)
        .await?;
    Ok(())
}

fn ensure_registered(registry: &CategoryRegistry, category: &str) -> Result<()> {
    if registry.contains(category) {
        return Ok(());
    }
    let known: Vec<&str> = registry.iter().map(|c| c.key()).collect();
    bail!(
        "unknown category `{category}`; expected one of: {}",
        known.join(", ")
    )
}
