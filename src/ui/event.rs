//! 事件处理
//!
//! 轮询 crossterm 键盘事件：Esc / Ctrl+C / Ctrl+Q 退出，Enter 提交，其余按键编辑输入缓冲。

use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// 应用事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Quit,
    Submit,
    Key(KeyEvent),
}

/// 事件处理器：按固定间隔轮询键盘
pub struct EventHandler {
    tick: Duration,
}

impl EventHandler {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }

    pub fn poll(&self) -> anyhow::Result<Option<AppEvent>> {
        if event::poll(self.tick)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    return Ok(Some(map_key(key)));
                }
            }
        }
        Ok(None)
    }
}

pub fn map_key(key: KeyEvent) -> AppEvent {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Esc => AppEvent::Quit,
        KeyCode::Char('c') | KeyCode::Char('q') if ctrl => AppEvent::Quit,
        KeyCode::Enter => AppEvent::Submit,
        _ => AppEvent::Key(key),
    }
}

/// 按键作用于输入缓冲
pub fn edit_input(input: &mut String, key: KeyEvent) {
    match key.code {
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => input.push(c),
        KeyCode::Backspace => {
            input.pop();
        }
        _ => {}
    }
}
