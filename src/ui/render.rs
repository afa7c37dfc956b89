//! 界面渲染
//!
//! 纯函数：给定存储快照与输入缓冲绘制一帧。每个通道一列，上方为对话（隐藏空消息，
//! 占位符显示 `...`），下方为诊断日志（error 标红）；底部为输入框，上一轮未结束时置灰。
//! 两区都自动跟随末尾。

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use crate::conversation::{ChannelLog, LogLevel, Role, StoreSnapshot};

/// 将内容按宽度换行，支持 UTF-8（按字符数，避免在 UTF-8 中间截断）
fn wrap_text(s: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![s.to_string()];
    }
    let mut lines = Vec::new();
    for para in s.split('\n') {
        let mut line = String::new();
        for ch in para.chars() {
            if line.chars().count() >= width {
                lines.push(std::mem::take(&mut line));
            }
            line.push(ch);
        }
        lines.push(line);
    }
    lines
}

fn message_lines(channel: &ChannelLog, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for (idx, m) in channel.visible_messages().enumerate() {
        if idx > 0 {
            lines.push(Line::from(""));
        }
        let (prefix, color) = match m.role {
            Role::User => ("You ", Color::Cyan),
            Role::Assistant => ("AI  ", Color::Green),
            Role::System => ("Sys ", Color::Gray),
        };
        let body = width.saturating_sub(prefix.len()).max(1);
        for (i, line) in wrap_text(m.text(), body).into_iter().enumerate() {
            let pref = if i == 0 { prefix } else { "    " };
            lines.push(Line::from(vec![
                Span::styled(pref, Style::default().fg(color).add_modifier(Modifier::BOLD)),
                Span::raw(line),
            ]));
        }
    }
    lines
}

fn log_lines(channel: &ChannelLog, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for record in &channel.log {
        let style = match record.level {
            LogLevel::Error => Style::default().fg(Color::Red),
            LogLevel::Info => Style::default().fg(Color::DarkGray),
        };
        // 只取时间部分，列宽有限
        let time = record
            .timestamp
            .get(11..23)
            .unwrap_or(record.timestamp.as_str());
        let text = format!("{} {} {}: {}", time, record.level, record.source, record.message);
        for line in wrap_text(&text, width.max(1)) {
            lines.push(Line::styled(line, style));
        }
    }
    lines
}

/// 末尾对齐：行数超出可视高度时滚到底
fn tail_paragraph(lines: Vec<Line<'static>>, block: Block<'static>, height: usize) -> Paragraph<'static> {
    let offset = lines.len().saturating_sub(height);
    Paragraph::new(Text::from(lines))
        .block(block)
        .scroll((offset.min(u16::MAX as usize) as u16, 0))
}

fn draw_channel(f: &mut Frame, area: Rect, title: &str, channel: &ChannelLog) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(area);

    let inner_width = |r: Rect| r.width.saturating_sub(2) as usize;
    let inner_height = |r: Rect| r.height.saturating_sub(2) as usize;

    let has_error = channel.log.iter().any(|r| r.is_error());
    let conv_block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    let conv = tail_paragraph(
        message_lines(channel, inner_width(rows[0])),
        conv_block,
        inner_height(rows[0]),
    );
    f.render_widget(conv, rows[0]);

    let log_block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if has_error { Color::Red } else { Color::Blue }));
    let log = tail_paragraph(
        log_lines(channel, inner_width(rows[1])),
        log_block,
        inner_height(rows[1]),
    );
    f.render_widget(log, rows[1]);
}

/// 绘制一帧：上方 N 列通道，下方输入框；`busy` 时输入框提示等待
pub fn draw(f: &mut Frame, snapshot: &StoreSnapshot, input_buffer: &str, busy: bool) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(3)])
        .split(f.area());

    let count = snapshot.channels.len().max(1) as u32;
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints((0..count).map(|_| Constraint::Ratio(1, count)))
        .split(chunks[0]);

    for (area, (kind, channel)) in columns.iter().zip(&snapshot.channels) {
        draw_channel(f, *area, kind.title(), channel);
    }

    let hint = " Enter 发送 │ Esc / Ctrl+Q 退出 ";
    let input_prompt = if busy { " 等待回复… " } else { " 输入 " };
    let input_block = Block::default()
        .title(input_prompt)
        .title_bottom(Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));
    let input = Paragraph::new(input_buffer)
        .block(input_block)
        .style(if busy {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default()
        });
    f.render_widget(input, chunks[1]);
}

#[cfg(test)]
mod tests {
    use ratatui::{backend::TestBackend, buffer::Buffer, Terminal};

    use super::*;
    use crate::conversation::{ChannelKind, ConversationStore, LogRecord, Message};

    fn render(snapshot: &StoreSnapshot, input: &str) -> Buffer {
        render_with(snapshot, input, false)
    }

    fn render_with(snapshot: &StoreSnapshot, input: &str, busy: bool) -> Buffer {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| draw(f, snapshot, input, busy)).unwrap();
        terminal.backend().buffer().clone()
    }

    fn buffer_text(buffer: &Buffer) -> String {
        buffer.content().iter().map(|c| c.symbol()).collect()
    }

    fn sample() -> StoreSnapshot {
        let store = ConversationStore::new(&ChannelKind::ALL);
        store.append(ChannelKind::Streaming, Message::user("hello there"));
        store.replace_tail_placeholder(ChannelKind::Streaming, Message::placeholder());
        store.append(ChannelKind::NonStreaming, Message::user("q"));
        store.append(ChannelKind::NonStreaming, Message::streaming(Role::Assistant, ""));
        store.append_log(ChannelKind::NonStreaming, LogRecord::error("AIChatProtocol", "boom"));
        store.snapshot()
    }

    #[test]
    fn test_render_is_idempotent() {
        let snapshot = sample();
        assert_eq!(render(&snapshot, "typing"), render(&snapshot, "typing"));
    }

    #[test]
    fn test_placeholder_and_titles_rendered() {
        let text = buffer_text(&render(&sample(), ""));
        assert!(text.contains("hello there"));
        assert!(text.contains("AI  ..."));
        assert!(text.contains("boom"));
        for kind in ChannelKind::ALL {
            assert!(text.contains(kind.title()));
        }
    }

    #[test]
    fn test_busy_input_greyed() {
        let snapshot = sample();
        let idle = render_with(&snapshot, "next", false);
        let busy = render_with(&snapshot, "next", true);
        assert_ne!(idle, busy);
        assert!(buffer_text(&busy).contains("next"));
    }

    #[test]
    fn test_empty_message_hidden() {
        let store = ConversationStore::new(&[ChannelKind::NonStreaming]);
        store.append(ChannelKind::NonStreaming, Message::streaming(Role::Assistant, ""));
        let text = buffer_text(&render(&store.snapshot(), ""));
        assert!(!text.contains("AI  "));
    }

    #[test]
    fn test_wrap_text_by_chars() {
        assert_eq!(wrap_text("abcdef", 4), vec!["abcd", "ef"]);
        assert_eq!(wrap_text("你好世界", 2), vec!["你好", "世界"]);
        assert_eq!(wrap_text("a\nb", 10), vec!["a", "b"]);
    }
}
