//! Password prompt without terminal echo

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{IsTerminal, Write};

#[derive(Debug, PartialEq, Eq)]
enum KeyAction {
    Continue,
    Submit,
    Cancel,
}

/// Apply one key press to the password typed so far
fn apply_key(password: &mut String, key: KeyEvent) -> KeyAction {
    if key.kind == KeyEventKind::Release {
        return KeyAction::Continue;
    }
    match key.code {
        KeyCode::Enter => KeyAction::Submit,
        KeyCode::Esc => KeyAction::Cancel,
        KeyCode::Char('c') | KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            KeyAction::Cancel
        }
        KeyCode::Backspace => {
            password.pop();
            KeyAction::Continue
        }
        KeyCode::Char(c) => {
            password.push(c);
            KeyAction::Continue
        }
        _ => KeyAction::Continue,
    }
}

/// Leaves raw mode when dropped, also on early return
struct RawMode;

impl RawMode {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to switch terminal to raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Prompt on stderr and read a password from stdin.
///
/// On a terminal the input is read key by key in raw mode so nothing is
/// echoed. Piped input is read as one line. Blocks the calling thread.
pub fn read_password(prompt: &str) -> Result<String> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{}", prompt)?;
    stderr.flush()?;

    if !std::io::stdin().is_terminal() {
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .context("Failed to read password")?;
        return Ok(line.trim_end_matches(['\r', '\n']).to_string());
    }

    let mut password = String::new();
    let action = {
        let _raw = RawMode::enable()?;
        loop {
            if let Event::Key(key) = event::read().context("Failed to read key")? {
                match apply_key(&mut password, key) {
                    KeyAction::Continue => {}
                    done => break done,
                }
            }
        }
    };
    writeln!(stderr)?;

    if action == KeyAction::Cancel {
        anyhow::bail!("Password entry cancelled");
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_typing_and_backspace() {
        let mut password = String::new();
        for c in "pw12".chars() {
            assert_eq!(apply_key(&mut password, press(KeyCode::Char(c))), KeyAction::Continue);
        }
        apply_key(&mut password, press(KeyCode::Backspace));
        assert_eq!(password, "pw1");
        assert_eq!(apply_key(&mut password, press(KeyCode::Enter)), KeyAction::Submit);
        assert_eq!(password, "pw1");
    }

    #[test]
    fn test_ctrl_c_cancels() {
        let mut password = String::from("secret");
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(apply_key(&mut password, key), KeyAction::Cancel);
        assert_eq!(apply_key(&mut password, press(KeyCode::Esc)), KeyAction::Cancel);
    }

    #[test]
    fn test_key_release_is_ignored() {
        let mut password = String::new();
        let mut key = press(KeyCode::Char('x'));
        key.kind = KeyEventKind::Release;
        assert_eq!(apply_key(&mut password, key), KeyAction::Continue);
        assert!(password.is_empty());
    }
}
