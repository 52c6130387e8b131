//! Secret prompting - asks the operator for a value without echoing it

use anyhow::{bail, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{IsTerminal, Write};

/// Capability for obtaining a secret interactively
pub trait SecretPrompt: Send + Sync {
    /// Ask for a value; the answer is never persisted or logged
    fn ask(&self, label: &str) -> Result<String>;
}

/// Reads from the controlling terminal in raw mode
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

impl SecretPrompt for TerminalPrompt {
    fn ask(&self, label: &str) -> Result<String> {
        if !std::io::stdin().is_terminal() {
            bail!("no terminal available to ask for {}", label);
        }

        let mut stderr = std::io::stderr();
        write!(stderr, "{}: ", label)?;
        stderr.flush()?;

        let mut secret = String::new();
        {
            let raw = RawModeGuard::enable()?;
            loop {
                let Event::Key(KeyEvent {
                    code,
                    modifiers,
                    kind,
                    ..
                }) = event::read()?
                else {
                    continue;
                };
                if kind == KeyEventKind::Release {
                    continue;
                }
                match code {
                    KeyCode::Enter => break,
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                        drop(raw);
                        writeln!(stderr)?;
                        bail!("prompt interrupted");
                    }
                    KeyCode::Char(c) => secret.push(c),
                    KeyCode::Backspace => {
                        secret.pop();
                    }
                    KeyCode::Esc => {
                        drop(raw);
                        writeln!(stderr)?;
                        bail!("prompt cancelled");
                    }
                    _ => {}
                }
            }
        }
        writeln!(stderr)?;
        Ok(secret)
    }
}
