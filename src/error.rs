use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// REST 接口调用错误
    #[error("API错误: {0}")]
    Api(#[from] ApiError),
    /// 进度推送通道错误
    #[error("进度通道错误: {0}")]
    Stream(#[from] StreamError),
    /// 答案表单校验错误
    #[error("校验错误: {0}")]
    Validation(#[from] ValidationError),
    /// 阶段状态机不接受的事件
    #[error("阶段错误: {0}")]
    Transition(#[from] TransitionError),
    /// 取消/回滚失败
    #[error("回滚错误: {0}")]
    Rollback(#[from] RollbackError),
    /// 本地草稿存储错误
    #[error("草稿存储错误: {0}")]
    Store(#[from] StoreError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// REST 接口调用错误
#[derive(Debug, Error)]
pub enum ApiError {
    /// 网络请求失败
    #[error("API请求失败 ({endpoint}): {source}")]
    RequestFailed {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 服务端返回非成功状态码
    #[error("API返回错误响应 ({endpoint}): status={status}, body={body:?}")]
    BadStatus {
        endpoint: String,
        status: u16,
        body: Option<String>,
    },
    /// 响应体解析失败
    #[error("响应解析失败 ({endpoint}): {source}")]
    DecodeFailed {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 预签名响应没有覆盖全部答案卷
    #[error("缺少答案卷上传地址 ({exam_code}): 序号 {missing:?}")]
    MissingUploadUrls { exam_code: String, missing: Vec<usize> },
}

impl ApiError {
    /// 服务端是否报告资源已不存在（404/410）
    pub fn is_gone(&self) -> bool {
        matches!(self, ApiError::BadStatus { status: 404 | 410, .. })
    }
}

/// 进度推送通道错误
#[derive(Debug, Error)]
pub enum StreamError {
    /// 建立通道失败
    #[error("无法建立进度通道 ({exam_code}): {reason}")]
    ConnectFailed { exam_code: String, reason: String },
    /// 通道在传输中断开
    #[error("进度通道中断 ({exam_code}): {reason}")]
    Disconnected { exam_code: String, reason: String },
    /// 长时间未收到任何消息
    #[error("进度通道超时 ({exam_code}): {idle_secs} 秒未收到消息")]
    TimedOut { exam_code: String, idle_secs: u64 },
    /// 会话已关闭
    #[error("进度会话已关闭 ({exam_code})")]
    Closed { exam_code: String },
}

/// 提交前的本地校验错误（只报告第一个问题）
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// 考试名称或日期为空
    #[error("请输入考试名称和日期")]
    MissingExamInfo,
    /// 没有出勤表
    #[error("请上传出勤表文件")]
    MissingAttendance,
    /// 没有任何题目
    #[error("答案表至少需要一道题目")]
    EmptyAnswerKey,
    /// 未填写答案且配分为 0 的题目
    #[error("第 {label} 题未填写答案且配分为 0，请检查")]
    IncompleteEntry { label: String },
    /// 学号反馈存在空值
    #[error("还有 {missing} 个学号未填写")]
    MissingStudentIds { missing: usize },
    /// 题目反馈存在空值
    #[error("还有 {missing} 道题目未填写正确答案")]
    MissingAnswers { missing: usize },
}

/// 阶段状态机不接受的事件
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("阶段 {stage} 不接受事件 {event}")]
pub struct TransitionError {
    pub stage: String,
    pub event: String,
}

/// 取消/回滚错误
#[derive(Debug, Error)]
pub enum RollbackError {
    /// 删除考试记录失败
    #[error("中断处理失败 ({exam_code}): {source}")]
    DeleteFailed {
        exam_code: String,
        #[source]
        source: ApiError,
    },
}

/// 草稿存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 读写失败
    #[error("草稿读写失败 ({key}): {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    /// 草稿内容无法解析
    #[error("草稿内容无法解析 ({key}): {source}")]
    Corrupted {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// 锁被污染
    #[error("草稿存储不可用: {0}")]
    Poisoned(String),
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 文件不存在
    #[error("文件不存在: {path}")]
    NotFound { path: String },
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

// ========== 从常见错误类型转换 ==========

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Api(ApiError::DecodeFailed {
            endpoint: String::new(),
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建API请求失败错误
    pub fn api_request_failed(
        endpoint: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Api(ApiError::RequestFailed {
            endpoint: endpoint.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建非法事件错误
    pub fn transition(stage: impl ToString, event: impl ToString) -> Self {
        AppError::Transition(TransitionError {
            stage: stage.to_string(),
            event: event.to_string(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gone_status_is_detected() {
        let gone = ApiError::BadStatus {
            endpoint: "/storage/active-processes/ABC".into(),
            status: 404,
            body: None,
        };
        let busy = ApiError::BadStatus {
            endpoint: "/storage/active-processes/ABC".into(),
            status: 500,
            body: None,
        };
        assert!(gone.is_gone());
        assert!(!busy.is_gone());
    }

    #[test]
    fn validation_message_names_the_offender() {
        let err = AppError::from(ValidationError::IncompleteEntry {
            label: "1-2".into(),
        });
        assert!(err.to_string().contains("1-2"));
    }
}
