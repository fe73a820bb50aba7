use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

/// Why a password is being requested; lets the prompt owner pick wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptPurpose {
    /// Unlock an encrypted store for this session.
    Unlock,
    /// Choose a password when enabling encryption.
    NewPassword,
    /// Repeat a freshly chosen password.
    Confirm,
    /// Re-enter the current password before a destructive transition.
    CurrentPassword,
}

impl fmt::Display for PromptPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PromptPurpose::Unlock => "Password",
            PromptPurpose::NewPassword => "New password",
            PromptPurpose::Confirm => "Confirm password",
            PromptPurpose::CurrentPassword => "Current password",
        };
        f.write_str(label)
    }
}

/// Source of user-supplied passwords (terminal, dialog, test script).
///
/// Requesting a password is a suspension point: the caller awaits until the user answers.
/// `None` means the user cancelled.
#[async_trait]
pub trait PasswordPrompt: Send + Sync {
    async fn request_password(&self, purpose: PromptPurpose) -> Option<String>;
}

/// Prompt that replays a fixed list of answers, then reports cancellation.
/// Useful for tests and non-interactive runs.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompt {
    answers: Arc<Mutex<VecDeque<Option<String>>>>,
    asked: Arc<Mutex<Vec<PromptPurpose>>>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let answers = answers.into_iter().map(|a| Some(a.into())).collect();
        Self {
            answers: Arc::new(Mutex::new(answers)),
            asked: Arc::default(),
        }
    }

    /// Prompt that cancels on the first request.
    pub fn cancelled() -> Self {
        Self::default()
    }

    /// Purposes requested so far, in order.
    pub fn asked(&self) -> Vec<PromptPurpose> {
        match self.asked.lock() {
            Ok(asked) => asked.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl PasswordPrompt for ScriptedPrompt {
    async fn request_password(&self, purpose: PromptPurpose) -> Option<String> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(purpose);
        }
        let mut answers = self.answers.lock().ok()?;
        answers.pop_front().flatten()
    }
}
