//! 命令行应用 - 编排层
//!
//! 读取考试草稿，提交后按阶段驱动整个评分流程：
//! 识别阶段显示进度并响应 Ctrl-C，反馈阶段从标准输入读取人工确认的值。

use anyhow::{anyhow, bail, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{error, info, warn};

use crate::clients::{ExamApi, HttpExamClient, ProgressTransport, SseTransport};
use crate::config::Config;
use crate::error::AppError;
use crate::models::{load_exam_draft, ExamDraft};
use crate::orchestrator::StageOrchestrator;
use crate::services::{DraftStore, FileDraftStore};
use crate::utils::logging::{self, truncate_text};
use crate::workflow::{format_elapsed, Stage};

/// 应用程序主结构
pub struct App {
    config: Config,
    draft: ExamDraft,
    orchestrator: StageOrchestrator,
    input: Lines<BufReader<Stdin>>,
}

impl App {
    /// 初始化应用
    ///
    /// 创建 REST 客户端、进度通道和草稿存储，并加载考试草稿
    pub async fn initialize(config: Config) -> Result<Self> {
        logging::log_startup(&config);

        let api: Arc<dyn ExamApi> = Arc::new(HttpExamClient::new(&config)?);
        let transport: Arc<dyn ProgressTransport> = Arc::new(SseTransport::new(&config)?);
        let store: Arc<dyn DraftStore> = Arc::new(FileDraftStore::new(&config.draft_dir));

        let draft = load_exam_draft(Path::new(&config.exam_draft_file)).await?;
        info!(
            "✓ 考试草稿已加载: {} ({} 题, {} 张答案卷)",
            draft.exam_name,
            draft.answer_key.len(),
            draft.answer_sheet_files.len()
        );

        let orchestrator =
            StageOrchestrator::new(api, transport, store, config.stream_settings());

        Ok(Self {
            config,
            draft,
            orchestrator,
            input: BufReader::new(tokio::io::stdin()).lines(),
        })
    }

    /// 运行整个评分流程
    pub async fn run(mut self) -> Result<()> {
        let started = Instant::now();

        let exam = self.orchestrator.submit(&self.draft).await?;
        logging::log_stage_start(self.orchestrator.stage(), &exam.exam_code);

        loop {
            let stage = self.orchestrator.stage().clone();
            let stage_started = Instant::now();

            match &stage {
                Stage::StudentIdRecognizing | Stage::QuestionRecognizing | Stage::Grading => {
                    self.watch_progress().await?
                }
                Stage::StudentIdFeedback => self.collect_student_ids().await?,
                Stage::QuestionFeedback => self.collect_answers().await?,
                Stage::Error { message, .. } => {
                    error!("❌ 服务端处理失败: {}", message);
                    if self.ask_yes_no("是否重试? (y/N)").await? {
                        self.orchestrator.retry().await?;
                    } else {
                        self.orchestrator.cancel().await?;
                    }
                }
                Stage::TimedOut { .. } => {
                    warn!(
                        "⏱️  长时间未收到进度，请稍后从 {} 恢复",
                        self.orchestrator.route()
                    );
                    break;
                }
                Stage::Done | Stage::Cancelled | Stage::Input => break,
            }

            if self.orchestrator.stage() != &stage {
                logging::log_stage_complete(&stage, stage_started.elapsed().as_secs());
                logging::log_stage_start(self.orchestrator.stage(), &exam.exam_code);
            }
        }

        logging::print_final_stats(
            self.orchestrator.exam_code(),
            self.orchestrator.stage(),
            started.elapsed(),
            &self.config.output_log_file,
        );
        Ok(())
    }

    /// 识别/评分阶段：显示进度，直到阶段结束或用户中断
    async fn watch_progress(&mut self) -> Result<()> {
        let mut progress = self
            .orchestrator
            .subscribe_progress()
            .ok_or_else(|| anyhow!("没有活动的进度会话"))?;

        loop {
            tokio::select! {
                result = self.orchestrator.wait_for_stage() => {
                    result?;
                    return Ok(());
                }
                Ok(()) = progress.changed() => {
                    let snapshot = progress.borrow_and_update().clone();
                    info!(
                        "⏳ 进度 {} (已用时 {})",
                        snapshot,
                        format_elapsed(self.orchestrator.elapsed_secs())
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("🛑 收到中断信号");
                    if !self.ask_yes_no("确定要中断并删除本次考试吗? (y/N)").await? {
                        continue;
                    }
                    match self.orchestrator.cancel().await {
                        Ok(_) => return Ok(()),
                        Err(e) => error!("❌ 中断失败，继续等待: {}", e),
                    }
                }
            }
        }
    }

    async fn collect_student_ids(&mut self) -> Result<()> {
        let mut items = self.orchestrator.student_id_items().await?;
        info!("📝 需要确认学号的答案卷: {} 张", items.len());

        loop {
            for item in items.iter_mut().filter(|i| i.value.trim().is_empty()) {
                info!(
                    "👉 {} 的学号 ({}):",
                    item.file_name,
                    truncate_text(&item.image_url, 80)
                );
                let line = self.read_line().await?;
                item.value = line.trim().to_string();
            }
            if let Err(e) = self.orchestrator.save_student_id_draft(&items) {
                warn!("⚠️  保存学号草稿失败: {}", e);
            }

            match self.orchestrator.submit_student_id_feedback(&items).await {
                Ok(_) => return Ok(()),
                Err(AppError::Validation(e)) => warn!("⚠️  {}", e),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn collect_answers(&mut self) -> Result<()> {
        let mut items = self.orchestrator.question_items().await?;
        info!("📝 需要确认答案的题目: {} 道", items.len());

        for item in items.iter_mut() {
            info!(
                "👉 第 {} 题 (识别结果: {}) 正确答案 [{}]:",
                item.question_number, item.recognized_answer, item.correct_answer
            );
            let line = self.read_line().await?;
            if !line.trim().is_empty() {
                item.correct_answer = line.trim().to_string();
            }
        }

        loop {
            if let Err(e) = self.orchestrator.save_question_draft(&items) {
                warn!("⚠️  保存题目草稿失败: {}", e);
            }
            match self.orchestrator.submit_question_feedback(&items).await {
                Ok(_) => return Ok(()),
                Err(AppError::Validation(e)) => {
                    warn!("⚠️  {}", e);
                    for item in items.iter_mut().filter(|i| i.correct_answer.trim().is_empty()) {
                        info!("👉 第 {} 题正确答案:", item.question_number);
                        item.correct_answer = self.read_line().await?.trim().to_string();
                    }
                }
                Err(AppError::Api(e)) => {
                    error!("❌ 提交题目反馈失败: {}", e);
                    if !self.ask_yes_no("是否重新提交? (y/N)").await? {
                        bail!("题目反馈未提交");
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn ask_yes_no(&mut self, prompt: &str) -> Result<bool> {
        info!("❓ {}", prompt);
        let answer = self.read_line().await?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }

    async fn read_line(&mut self) -> Result<String> {
        match self.input.next_line().await? {
            Some(line) => Ok(line),
            None => bail!("标准输入已关闭"),
        }
    }
}
