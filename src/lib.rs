//! # Gradi Flow
//!
//! 考试自动评分流程的 Rust 客户端
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 接口层（Clients）
//! - `clients/` - 与后端通信，只暴露能力
//! - `ExamApi` - REST 接口（考试、上传、反馈、进度查询）
//! - `ProgressTransport` - 进度推送通道（SSE）
//!
//! ### ② 数据层（Models）
//! - `models/` - 答案表、考试、进度消息
//! - `AnswerKey` - 不可变的答案表编辑操作
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `FeedbackService` - 人工反馈和本地草稿
//! - `RollbackController` - 中断时停止进程并删除考试
//! - `HistoryBrowser` - 历史考试的搜索、分组和批量删除
//! - `reorder` - 拖拽排序
//!
//! ### ④ 流程层（Workflow）
//! - `workflow/` - 定义阶段和进度会话
//! - `Stage` - 阶段状态机
//! - `ProgressStreamClient` - 进度会话（重连、超时、自动完成）
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/stage_orchestrator` - 阶段编排器
//! - `orchestrator/app` - 命令行应用
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{ExamApi, HttpExamClient, ProgressTransport, SseTransport};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{AnswerKey, ExamDraft, Question};
pub use orchestrator::{App, StageOrchestrator};
pub use workflow::{ProgressStreamClient, Stage, StageEvent};
