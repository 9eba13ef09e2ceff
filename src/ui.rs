use ratatui::{
    Frame,
    layout::{Constraint, Flex, Layout, Rect},
    style::{Color, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Clear, List, ListItem, ListState, Paragraph, Wrap},
};

use crate::model::{Model, Screen, UIData};
use recview::cursor::{Field, FieldLabel, Level};
use recview::domain::{CMDMode, RVConfig};

const CMDLINE_HEIGHT: u16 = 1;
const NOTICE_HEIGHT: u16 = 1;
const POPUP_PERCENT: u16 = 70;

pub struct RecordUI {
    label_width: u16,
}

impl RecordUI {
    pub fn new(cfg: &RVConfig) -> Self {
        Self {
            label_width: cfg.label_width,
        }
    }

    pub fn draw(&mut self, model: &Model, frame: &mut Frame) {
        let uidata = model.get_uidata();
        let [title_area, main_area, notice_area, cmd_area] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(NOTICE_HEIGHT),
            Constraint::Length(CMDLINE_HEIGHT),
        ])
        .areas(frame.area());

        frame.render_widget(self.title(uidata), title_area);
        match uidata.screen {
            Screen::Load => self.draw_load_form(uidata, frame, main_area),
            Screen::Viewer => self.draw_viewer(model, frame, main_area),
        }
        frame.render_widget(notice_banner(uidata), notice_area);
        self.draw_cmdline(uidata, frame, cmd_area);

        if uidata.show_popup {
            let area = popup_area(frame.area(), POPUP_PERCENT);
            frame.render_widget(Clear, area);
            frame.render_widget(
                Paragraph::new(uidata.popup_message.as_str())
                    .block(Block::bordered().title(" Help "))
                    .wrap(Wrap { trim: false }),
                area,
            );
        }
    }

    fn title(&self, uidata: &UIData) -> Line<'_> {
        let mut spans = vec![Span::from(" recview ").bold().reversed()];
        if !uidata.name.is_empty() {
            spans.push(Span::from(format!(" {} ", uidata.name)).bold());
            spans.push(Span::from(uidata.record_label.clone()));
        }
        Line::from(spans)
    }

    fn draw_load_form(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let block = Block::bordered().title(" Open dataset ");
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let [help_area, _, input_area] = Layout::vertical([
            Constraint::Length(2),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .areas(inner);
        frame.render_widget(
            Paragraph::new(
                "A .csv or .sas7bdat file, or a directory of .txt files.\nEnter loads, Esc quits.",
            )
            .dim(),
            help_area,
        );

        let prefix = "Path: ";
        frame.render_widget(
            Line::from(vec![
                Span::from(prefix).bold(),
                Span::from(uidata.cmdinput.input.as_str()),
            ]),
            input_area,
        );
        if uidata.cmd_mode == Some(CMDMode::LoadPath) && !uidata.show_popup {
            frame.set_cursor_position((
                input_area.x + (prefix.len() + uidata.cmdinput.cursor_pos) as u16,
                input_area.y,
            ));
        }
    }

    fn draw_viewer(&self, model: &Model, frame: &mut Frame, area: Rect) {
        let uidata = model.get_uidata();
        let [search_area, fields_area] =
            Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).areas(area);

        let value = if uidata.search_value.is_empty() {
            Span::from("(all records)").dim()
        } else {
            Span::from(format!("== {:?}", uidata.search_value))
        };
        frame.render_widget(
            Line::from(vec![
                Span::from(" Column: ").bold(),
                Span::from(format!("< {} >", uidata.search_column)).cyan(),
                Span::from(" "),
                value,
            ]),
            search_area,
        );

        let value_width = fields_area.width.saturating_sub(self.label_width + 3) as usize;
        let items: Vec<ListItem> = uidata
            .fields
            .iter()
            .map(|f| {
                let height = model.field_height(f.label) as usize;
                ListItem::new(self.field_text(f, value_width, height))
            })
            .collect();
        let list = List::new(items)
            .block(Block::bordered())
            .highlight_style(Style::new().reversed());
        let mut state = ListState::default().with_selected(Some(uidata.selected_field));
        frame.render_stateful_widget(list, fields_area, &mut state);
    }

    fn field_text(&self, field: &Field, width: usize, height: usize) -> Text<'static> {
        let label = format!(
            "{:>w$} │ ",
            truncate(&field.column, self.label_width as usize),
            w = self.label_width as usize
        );
        let lines = match field.label {
            FieldLabel::Text => vec![field.value.replace('\n', " ↵ ")],
            FieldLabel::Textarea => wrap_lines(&field.value, width, height),
        };
        let pad = " ".repeat(self.label_width as usize);
        lines
            .into_iter()
            .enumerate()
            .map(|(i, l)| {
                let gutter = if i == 0 {
                    Span::from(label.clone()).bold()
                } else {
                    Span::from(format!("{pad} │ "))
                };
                Line::from(vec![gutter, Span::from(l)])
            })
            .collect::<Vec<Line>>()
            .into()
    }

    fn draw_cmdline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        if uidata.active_cmdinput && uidata.cmd_mode == Some(CMDMode::SearchValue) {
            let prefix = format!("{} == ", uidata.search_column);
            frame.render_widget(
                Line::from(vec![
                    Span::from(prefix.clone()).bold(),
                    Span::from(uidata.cmdinput.input.as_str()),
                ]),
                area,
            );
            frame.set_cursor_position((
                area.x + (prefix.chars().count() + uidata.cmdinput.cursor_pos) as u16,
                area.y,
            ));
        } else {
            frame.render_widget(Line::from(uidata.status_message.as_str()).dim(), area);
        }
    }
}

fn notice_banner(uidata: &UIData) -> Line<'_> {
    if uidata.notice.is_empty() {
        return Line::default();
    }
    let color = match uidata.notice.level {
        Level::Success => Color::Green,
        Level::Info => Color::Blue,
        Level::Warning => Color::Yellow,
        Level::Danger => Color::Red,
    };
    Line::from(format!(" {} ", uidata.notice.text)).style(Style::new().fg(Color::Black).bg(color))
}

fn popup_area(area: Rect, percent: u16) -> Rect {
    let vertical = Layout::vertical([Constraint::Percentage(percent)]).flex(Flex::Center);
    let horizontal = Layout::horizontal([Constraint::Percentage(percent)]).flex(Flex::Center);
    let [area] = vertical.areas(area);
    let [area] = horizontal.areas(area);
    area
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Hard wrap `s` into at most `max_lines` lines of `width` chars.
fn wrap_lines(s: &str, width: usize, max_lines: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for paragraph in s.lines() {
        let chars: Vec<char> = paragraph.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
        }
        for chunk in chars.chunks(width) {
            lines.push(chunk.iter().collect());
        }
    }
    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            last.pop();
            last.push('…');
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_and_cuts_long_values() {
        let lines = wrap_lines("abcdefghij", 4, 2);
        assert_eq!(lines, vec!["abcd".to_string(), "efg…".to_string()]);
        assert_eq!(wrap_lines("ab\ncd", 10, 4), vec!["ab", "cd"]);
    }

    #[test]
    fn truncates_labels() {
        assert_eq!(truncate("column", 10), "column");
        assert_eq!(truncate("a_very_long_column", 6), "a_ver…");
    }
}
