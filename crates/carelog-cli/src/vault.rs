use carelog_core::{
    prompt::{PasswordPrompt, PromptPurpose},
    storage::KeyValueStore,
};
use carelog_crypto::{
    CategoryStatus, CryptError, EncryptionManager, MigrationReport, RecordState, SessionHandle,
};
use color_eyre::{eyre::bail, Result};
use zeroize::Zeroizing;

use crate::{config, storage};

/// Print the encryption state and how each category is stored.
pub async fn status(config: &config::Config) -> Result<()> {
    let manager = storage::open_manager(config).await?;
    println!("Encryption: {}", manager.status());
    for line in category_lines(&manager.inspect().await?) {
        println!("{line}");
    }
    Ok(())
}

pub async fn enable(config: &config::Config, prompt: &dyn PasswordPrompt) -> Result<()> {
    let manager = storage::open_manager(config).await?;
    enable_with(&manager, prompt).await?;
    println!("Encryption enabled.");
    for line in category_lines(&manager.inspect().await?) {
        println!("{line}");
    }
    Ok(())
}

pub async fn disable(config: &config::Config, prompt: &dyn PasswordPrompt) -> Result<()> {
    let manager = storage::open_manager(config).await?;
    let report = disable_with(&manager, prompt).await?;
    println!(
        "Encryption disabled; {} categories decrypted.",
        report.converted.len()
    );
    Ok(())
}

pub async fn change_password(config: &config::Config, prompt: &dyn PasswordPrompt) -> Result<()> {
    let manager = storage::open_manager(config).await?;
    change_password_with(&manager, prompt).await?;
    println!("Password changed.");
    Ok(())
}

/// Clear both encryption flags. Envelopes already on disk are left untouched.
pub async fn reset(config: &config::Config, force: bool) -> Result<()> {
    if !force {
        bail!(
            "reset discards the stored password; encrypted records stay unreadable.\n\
             re-run with `carelog reset --force` to continue"
        );
    }
    let store = storage::store_from_config(config)?;
    EncryptionManager::force_reset(&store).await?;
    println!("Encryption flags cleared.");
    Ok(())
}

/// Unlock through `prompt` when encryption is enabled; `None` when it is disabled.
pub(crate) async fn unlock_if_enabled<S: KeyValueStore>(
    manager: &EncryptionManager<S>,
    prompt: &dyn PasswordPrompt,
) -> Result<Option<SessionHandle>, CryptError> {
    if !manager.is_enabled() {
        return Ok(None);
    }
    manager.unlock_with(prompt).await.map(Some)
}

async fn enable_with<S: KeyValueStore>(
    manager: &EncryptionManager<S>,
    prompt: &dyn PasswordPrompt,
) -> Result<SessionHandle> {
    let password = ask_new_password(prompt).await?;
    Ok(manager.setup(&password).await?)
}

async fn disable_with<S: KeyValueStore>(
    manager: &EncryptionManager<S>,
    prompt: &dyn PasswordPrompt,
) -> Result<MigrationReport> {
    let password = ask(prompt, PromptPurpose::CurrentPassword).await?;
    Ok(manager.disable(&password).await?)
}

async fn change_password_with<S: KeyValueStore>(
    manager: &EncryptionManager<S>,
    prompt: &dyn PasswordPrompt,
) -> Result<SessionHandle> {
    let current = ask(prompt, PromptPurpose::CurrentPassword).await?;
    manager.unlock(&current).await?;
    let new_password = ask_new_password(prompt).await?;
    Ok(manager.change_password(&current, &new_password).await?)
}

async fn ask(prompt: &dyn PasswordPrompt, purpose: PromptPurpose) -> Result<Zeroizing<String>> {
    match prompt.request_password(purpose).await {
        Some(password) => Ok(Zeroizing::new(password)),
        None => Err(CryptError::Cancelled.into()),
    }
}

async fn ask_new_password(prompt: &dyn PasswordPrompt) -> Result<Zeroizing<String>> {
    let password = ask(prompt, PromptPurpose::NewPassword).await?;
    let confirmation = ask(prompt, PromptPurpose::Confirm).await?;
    if *password != *confirmation {
        bail!("passwords do not match");
    }
    Ok(password)
}

fn category_lines(statuses: &[CategoryStatus]) -> Vec<String> {
    statuses
        .iter()
        .map(|status| {
            let label = match status.state {
                RecordState::Missing => "empty",
                RecordState::Plaintext => "plaintext",
                RecordState::Encrypted => "encrypted",
            };
            format!("  {:<14} {label}", status.category.key())
        })
        .collect()
}
