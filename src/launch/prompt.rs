use dialoguer::console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password, Select};

use crate::error::LauncherError;

/// Interactive questions asked by the configuration wizard.
pub trait Prompter {
    fn select(&self, prompt: &str, items: &[String], default: usize) -> Result<usize, LauncherError>;
    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String, LauncherError>;
    /// Hidden input; an empty answer is allowed.
    fn secret(&self, prompt: &str) -> Result<String, LauncherError>;
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, LauncherError>;
    fn note(&self, message: &str);
}

pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn select(&self, prompt: &str, items: &[String], default: usize) -> Result<usize, LauncherError> {
        let default = default.min(items.len().saturating_sub(1));
        Ok(Select::with_theme(&self.theme)
            .with_prompt(prompt)
            .items(items)
            .default(default)
            .interact()?)
    }

    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String, LauncherError> {
        let mut input = Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true);
        if let Some(default) = default {
            input = input.default(default.to_string());
        }
        Ok(input.interact_text()?.trim().to_string())
    }

    fn secret(&self, prompt: &str) -> Result<String, LauncherError> {
        Ok(Password::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()?
            .trim()
            .to_string())
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, LauncherError> {
        Ok(Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }

    fn note(&self, message: &str) {
        eprintln!("{}", style(message).cyan());
    }
}
