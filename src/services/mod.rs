pub mod draft_store;
pub mod feedback;
pub mod history;
pub mod reorder;
pub mod rollback;

pub use draft_store::{DraftStore, FileDraftStore, MemoryDraftStore};
pub use feedback::{FeedbackService, QuestionItem, StudentIdItem};
pub use history::{BulkDeleteReport, ExamGroup, HistoryBrowser};
pub use reorder::{apply_drop, move_item, DragDrop, ListScope};
pub use rollback::{ProcessStop, RollbackController, RollbackReport};
