use std::sync::Mutex;

use async_trait::async_trait;
use carelog_core::prompt::{PasswordPrompt, PromptPurpose};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Answers unlock and current-password prompts without a terminal.
pub const PASSWORD_ENV: &str = "CARELOG_PASSWORD";
/// Answers new-password prompts; falls back to [`PASSWORD_ENV`].
pub const NEW_PASSWORD_ENV: &str = "CARELOG_NEW_PASSWORD";

/// Reads passwords from the controlling terminal without echo.
///
/// Environment overrides answer each purpose at most once so a wrong value cannot
/// spin the unlock loop; later requests fall through to the terminal.
pub struct TerminalPrompt {
    password: Option<Zeroizing<String>>,
    new_password: Option<Zeroizing<String>>,
    answered: Mutex<Vec<PromptPurpose>>,
}

impl TerminalPrompt {
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.is_empty())
                .map(Zeroizing::new)
        };
        Self::new(read(PASSWORD_ENV), read(NEW_PASSWORD_ENV))
    }

    fn new(password: Option<Zeroizing<String>>, new_password: Option<Zeroizing<String>>) -> Self {
        Self {
            password,
            new_password,
            answered: Mutex::new(Vec::new()),
        }
    }

    fn from_environment(&self, purpose: PromptPurpose) -> Option<String> {
        let source = match purpose {
            PromptPurpose::Unlock | PromptPurpose::CurrentPassword => self.password.as_ref(),
            PromptPurpose::NewPassword | PromptPurpose::Confirm => {
                self.new_password.as_ref().or(self.password.as_ref())
            }
        }?;
        let mut answered = self
            .answered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if answered.contains(&purpose) {
            return None;
        }
        answered.push(purpose);
        debug!(%purpose, "answering prompt from environment");
        Some(source.as_str().to_owned())
    }
}

#[async_trait]
impl PasswordPrompt for TerminalPrompt {
    async fn request_password(&self, purpose: PromptPurpose) -> Option<String> {
        if let Some(password) = self.from_environment(purpose) {
            return Some(password);
        }

        let label = format!("{purpose}: ");
        let answer = tokio::task::spawn_blocking(move || rpassword::prompt_password(label)).await;
        match answer {
            Ok(Ok(password)) if !password.is_empty() => Some(password),
            Ok(Ok(_)) => None,
            Ok(Err(err)) => {
                warn!(%err, "could not read password from terminal");
                None
            }
            Err(err) => {
                warn!(%err, "password prompt task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_answers_each_purpose_once() {
        let prompt = TerminalPrompt::new(Some(Zeroizing::new("Sup3rSecret!".into())), None);

        assert_eq!(
            prompt.from_environment(PromptPurpose::Unlock).as_deref(),
            Some("Sup3rSecret!")
        );
        assert_eq!(prompt.from_environment(PromptPurpose::Unlock), None);
        assert_eq!(
            prompt.from_environment(PromptPurpose::Confirm).as_deref(),
            Some("Sup3rSecret!")
        );
    }

    #[test]
    fn new_password_override_only_answers_new_password_prompts() {
        let prompt = TerminalPrompt::new(
            Some(Zeroizing::new("OldPassw0rd".into())),
            Some(Zeroizing::new("N3wPassword".into())),
        );

        assert_eq!(
            prompt.from_environment(PromptPurpose::CurrentPassword).as_deref(),
            Some("OldPassw0rd")
        );
        assert_eq!(
            prompt.from_environment(PromptPurpose::NewPassword).as_deref(),
            Some("N3wPassword")
        );
        assert_eq!(
            prompt.from_environment(PromptPurpose::Confirm).as_deref(),
            Some("N3wPassword")
        );
    }

    #[test]
    fn no_environment_means_no_answer() {
        let prompt = TerminalPrompt::new(None, None);
        assert_eq!(prompt.from_environment(PromptPurpose::Unlock), None);
    }
}
