use std::time::Duration;
use tracing::trace;

use crate::model::Model;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyModifiers};
use recview::domain::{Message, RVConfig, RVError};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &RVConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, RVError> {
        if event::poll(Duration::from_millis(self.event_poll_time))? {
            match event::read()? {
                Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                    // Text inputs get the keys unmapped.
                    if model.raw_keyevents() {
                        return Ok(Some(Message::RawKey(key)));
                    }
                    return Ok(self.handle_key(key));
                }
                Event::Resize(width, height) => {
                    return Ok(Some(Message::Resize(width as usize, height as usize)));
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn handle_key(&self, key: event::KeyEvent) -> Option<Message> {
        let message = match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Message::Quit),
            (KeyCode::Char('q'), _) => Some(Message::Quit),
            (KeyCode::Esc, _) => Some(Message::Exit),
            (KeyCode::Enter, _) => Some(Message::Enter),
            (KeyCode::Char('n'), _) | (KeyCode::Right, _) => Some(Message::NextRecord),
            (KeyCode::Char('p'), _) | (KeyCode::Left, _) => Some(Message::PrevRecord),
            (KeyCode::Up, _) | (KeyCode::Char('k'), _) => Some(Message::FieldUp),
            (KeyCode::Down, _) | (KeyCode::Char('j'), _) => Some(Message::FieldDown),
            (KeyCode::Tab, _) => Some(Message::NextColumn),
            (KeyCode::BackTab, _) => Some(Message::PrevColumn),
            (KeyCode::Char('/'), _) => Some(Message::Search),
            (KeyCode::Char('r'), _) => Some(Message::Reset),
            (KeyCode::Char('y'), _) => Some(Message::CopyField),
            (KeyCode::Char('o'), _) => Some(Message::Open),
            (KeyCode::Char('?'), _) => Some(Message::Help),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyEvent;

    #[test]
    fn maps_navigation_keys() {
        let controller = Controller::new(&RVConfig::default());
        let key = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(
            controller.handle_key(key(KeyCode::Char('n'))),
            Some(Message::NextRecord)
        );
        assert_eq!(
            controller.handle_key(key(KeyCode::Left)),
            Some(Message::PrevRecord)
        );
        assert_eq!(
            controller.handle_key(KeyEvent::new(KeyCode::BackTab, KeyModifiers::SHIFT)),
            Some(Message::PrevColumn)
        );
        assert_eq!(controller.handle_key(key(KeyCode::Char('x'))), None);
    }
}
