use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voxline_foundation::ShutdownToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    /// Start or stop the user's speaking turn.
    ToggleTalk,
    Quit,
}

/// Space toggles the turn; q, Esc, or Ctrl-C quits. Raw mode delivers
/// Ctrl-C as a key event instead of SIGINT, so it is mapped here too.
pub fn map_key(key: &KeyEvent) -> Option<KeyCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyCommand::Quit)
        }
        KeyCode::Char(' ') => Some(KeyCommand::ToggleTalk),
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(KeyCommand::Quit),
        _ => None,
    }
}

/// Poll the terminal for key events on a blocking thread, bounded by
/// `POLL_INTERVAL` so the loop observes cancellation promptly.
pub fn spawn_keyboard_listener(
    tx: mpsc::Sender<KeyCommand>,
    shutdown: ShutdownToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        if let Err(e) = terminal::enable_raw_mode() {
            tracing::warn!("Failed to enable raw mode: {}; keyboard control degraded", e);
        }

        while !shutdown.is_requested() {
            match event::poll(POLL_INTERVAL) {
                Ok(true) => {
                    if let Ok(Event::Key(key)) = event::read() {
                        if let Some(cmd) = map_key(&key) {
                            if tx.blocking_send(cmd).is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("Keyboard poll failed: {}", e);
                    break;
                }
            }
        }

        let _ = terminal::disable_raw_mode();
        tracing::debug!("Keyboard listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn space_toggles_and_quit_keys_quit() {
        assert_eq!(
            map_key(&press(KeyCode::Char(' '), KeyModifiers::NONE)),
            Some(KeyCommand::ToggleTalk)
        );
        assert_eq!(
            map_key(&press(KeyCode::Char('q'), KeyModifiers::NONE)),
            Some(KeyCommand::Quit)
        );
        assert_eq!(
            map_key(&press(KeyCode::Esc, KeyModifiers::NONE)),
            Some(KeyCommand::Quit)
        );
        assert_eq!(
            map_key(&press(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(KeyCommand::Quit)
        );
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        assert_eq!(map_key(&press(KeyCode::Char('c'), KeyModifiers::NONE)), None);
        assert_eq!(map_key(&press(KeyCode::Enter, KeyModifiers::NONE)), None);
        assert_eq!(map_key(&press(KeyCode::Up, KeyModifiers::NONE)), None);
    }

    #[test]
    fn key_releases_are_ignored() {
        let release = KeyEvent::new_with_kind(
            KeyCode::Char(' '),
            KeyModifiers::NONE,
            KeyEventKind::Release,
        );
        assert_eq!(map_key(&release), None);
    }
}
