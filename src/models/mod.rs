pub mod answer_key;
pub mod exam;
pub mod loaders;
pub mod progress;
pub mod question;

pub use answer_key::{AnswerKey, NumberingRow, QuestionPatch, SubQuestionPatch};
pub use exam::{
    BatchPresignRequest, BatchPresignResponse, CreateExamRequest, CreatedExam, ExamDraft,
    ExamHistoryItem, PresignImage, PresignedUrl, QuestionCorrection, QuestionFeedback,
    SaveQuestionsRequest, StudentIdCorrection, StudentIdFeedback, UnknownQuestion,
};
pub use loaders::{load_exam_draft, load_sheet_dir};
pub use progress::{ProgressMessage, ProgressPayload, ProgressSnapshot, ProgressStatus};
pub use question::{Question, QuestionType, SubQuestion};
