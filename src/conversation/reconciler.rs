//! 会话变更规则
//!
//! 四个操作：无条件追加、替换尾部占位/流式消息、非流式提交、追加日志。
//! 编排器只依赖 [`Reconciler`] trait；测试可替换为记录调用的实现。

use super::log::LogRecord;
use super::message::Message;

/// 无条件追加到尾部
pub fn append(messages: &mut Vec<Message>, message: Message) {
    messages.push(message);
}

/// 仅当尾部是占位符或助手的流式中间态时弹出，然后压入新消息。
/// 用户消息与已完成的消息永远不会被挤掉。
pub fn replace_tail_placeholder(messages: &mut Vec<Message>, message: Message) {
    if messages.last().is_some_and(Message::is_transient) {
        messages.pop();
    }
    messages.push(message);
}

/// 尾部是占位符则消费掉（只在首个真实回复时发生一次），然后压入
pub fn append_non_streaming(messages: &mut Vec<Message>, message: Message) {
    if messages.last().is_some_and(Message::is_placeholder) {
        messages.pop();
    }
    messages.push(message);
}

pub fn append_log(log: &mut Vec<LogRecord>, record: LogRecord) {
    log.push(record);
}

/// 单个通道的变更接口（协议客户端只通过它修改会话）
pub trait Reconciler: Send + Sync {
    fn append(&self, message: Message);

    fn replace_tail_placeholder(&self, message: Message);

    fn append_non_streaming(&self, message: Message);

    fn append_log(&self, record: LogRecord);
}

#[cfg(test)]
pub(crate) mod recording {
    //! 测试替身：按顺序记录所有调用

    use std::sync::Mutex;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Call {
        Append(Message),
        ReplaceTail(Message),
        AppendNonStreaming(Message),
        Log(LogRecord),
    }

    #[derive(Default)]
    pub struct RecordingReconciler {
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingReconciler {
        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn logs(&self) -> Vec<LogRecord> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Log(r) => Some(r),
                    _ => None,
                })
                .collect()
        }

        /// 把记录的消息调用重放到一个序列上，得到最终会话
        pub fn replay(&self, mut messages: Vec<Message>) -> Vec<Message> {
            for call in self.calls() {
                match call {
                    Call::Append(m) => append(&mut messages, m),
                    Call::ReplaceTail(m) => replace_tail_placeholder(&mut messages, m),
                    Call::AppendNonStreaming(m) => append_non_streaming(&mut messages, m),
                    Call::Log(_) => {}
                }
            }
            messages
        }
    }

    impl Reconciler for RecordingReconciler {
        fn append(&self, message: Message) {
            self.calls.lock().unwrap().push(Call::Append(message));
        }

        fn replace_tail_placeholder(&self, message: Message) {
            self.calls.lock().unwrap().push(Call::ReplaceTail(message));
        }

        fn append_non_streaming(&self, message: Message) {
            self.calls.lock().unwrap().push(Call::AppendNonStreaming(message));
        }

        fn append_log(&self, record: LogRecord) {
            self.calls.lock().unwrap().push(Call::Log(record));
        }
    }
}
