//! 外部服务：MinerU 版面分析与大模型目录解析
pub mod mineru;
pub mod poll;
pub mod semantic;

pub use mineru::{load_layout_items, load_output_lines, LayoutItem, MineruClient};
pub use poll::{Clock, PollState, Poller, TokioClock};
pub use semantic::SemanticParser;
