//! TUI 应用主循环
//!
//! 进入全屏/原始模式，轮询键盘事件与存储快照。Enter 时先同步 `prepare`（用户消息立即可见），
//! 再把 `dispatch` 交给后台任务；上一轮未结束时 `prepare` 拒绝，输入保留。渲染只读快照。

use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::Duration;

use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use super::event::{edit_input, AppEvent, EventHandler};
use super::render::draw;
use crate::core::DispatchCoordinator;

/// 运行 TUI：启用原始模式与全屏，循环 poll 事件 + 渲染，退出时恢复终端
pub async fn run_app(coordinator: Arc<DispatchCoordinator>) -> anyhow::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, coordinator).await;
    restore_terminal(&mut terminal)?;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    coordinator: Arc<DispatchCoordinator>,
) -> anyhow::Result<()> {
    let events = EventHandler::new(Duration::from_millis(50));
    let mut snapshots = coordinator.store().subscribe();
    let mut input_buffer = String::new();

    loop {
        match events.poll()? {
            Some(AppEvent::Quit) => break,
            Some(AppEvent::Submit) => {
                if matches!(input_buffer.trim(), "/exit" | "/quit") {
                    break;
                }
                if let Some(turn) = coordinator.prepare(&mut input_buffer) {
                    let c = Arc::clone(&coordinator);
                    tokio::spawn(async move { c.dispatch(turn).await });
                }
            }
            Some(AppEvent::Key(key)) => edit_input(&mut input_buffer, key),
            None => {}
        }

        let snapshot = snapshots.borrow_and_update().clone();
        let busy = coordinator.is_busy();
        terminal.draw(|f| draw(f, &snapshot, &input_buffer, busy))?;

        tokio::task::yield_now().await;
    }

    tracing::info!("TUI exiting");
    Ok(())
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
