//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责把各个阶段串成完整的评分流程，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `stage_orchestrator` - 阶段编排器
//! - 提交考试（创建 → 出勤表 → 答案表 → 答案卷）
//! - 持有唯一的进度会话，阶段切换时关闭旧会话
//! - 处理反馈提交、重试、中断和后退
//! - 从路由恢复阶段
//!
//! ### `app` - 命令行应用
//! - 管理应用生命周期（初始化、运行）
//! - 显示进度，响应 Ctrl-C
//! - 从标准输入读取人工反馈
//! - 输出最终统计信息
//!
//! ## 层次关系
//!
//! ```text
//! app (命令行交互)
//!     ↓
//! stage_orchestrator (阶段切换、会话管理)
//!     ↓
//! workflow (Stage / ProgressStreamClient / back_guard)
//!     ↓
//! services (能力层：feedback / rollback / history / reorder)
//!     ↓
//! clients (ExamApi / ProgressTransport)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：stage_orchestrator 管阶段，app 管交互
//! 2. **会话唯一**：只有编排器持有 ProgressSession
//! 3. **向下依赖**：编排层 → workflow → services → clients
//! 4. **先校验后执行**：事件不合法时不发出任何请求

pub mod app;
pub mod stage_orchestrator;

// 重新导出主要类型
pub use app::App;
pub use stage_orchestrator::{ExamRef, StageOrchestrator};
