//! ストリームフィルタのエラー型

use alloc::string::String;

/// エラーの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 構築時の設定エラー（即時・局所的）
    Configuration,
    /// 述語が判定プロトコルに違反した
    PredicateProtocol,
    /// スケジューラの順序・単一配送の不変条件に違反した
    SchedulerProtocol,
    /// 破棄・中断により未処理の continuation を拒否した
    Aborted,
}

/// ストリームフィルタのエラー
///
/// どのエラーも自動リトライされない。プロトコルエラーは観測したチャンネルの
/// 終端エラーとして伝播する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFilterError {
    /// 述語が関数でない
    BadPredicate(String),
    /// オプションが不正
    InvalidOptions(String),
    /// decide が 2 回以上呼ばれた
    DecidedTwice,
    /// Promise を返した後に decide が呼ばれた
    DecidedAfterPromise,
    /// decide が一度も呼ばれずに破棄された
    DecisionDropped,
    /// Promise 形式の述語が失敗した（reject / 例外）
    PredicateRejected(String),
    /// EndSentinel の後に enqueue された
    EnqueueAfterEnd,
    /// 需要フラグが false のまま配送しようとした
    DeliveryWithoutDemand,
    /// 外部 writer が finish した後に書き込んだ
    WriteAfterFinish,
    /// finalize 済みのフィルタに process / finalize した
    StreamEnded,
    /// 前のアイテムの continuation が発火する前に process された
    OverlappingProcess,
    /// チャンネルが破棄・中断された
    Aborted,
}

impl StreamFilterError {
    /// エラーの分類を返す
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamFilterError::BadPredicate(_) | StreamFilterError::InvalidOptions(_) => {
                ErrorKind::Configuration
            }
            StreamFilterError::DecidedTwice
            | StreamFilterError::DecidedAfterPromise
            | StreamFilterError::DecisionDropped
            | StreamFilterError::PredicateRejected(_) => ErrorKind::PredicateProtocol,
            StreamFilterError::EnqueueAfterEnd
            | StreamFilterError::DeliveryWithoutDemand
            | StreamFilterError::WriteAfterFinish
            | StreamFilterError::StreamEnded
            | StreamFilterError::OverlappingProcess => ErrorKind::SchedulerProtocol,
            StreamFilterError::Aborted => ErrorKind::Aborted,
        }
    }

    /// JS 側に渡す安定したエラーコード
    pub fn code(&self) -> &'static str {
        match self {
            StreamFilterError::BadPredicate(_) => "E_BAD_FILTER_CALLBACK",
            StreamFilterError::InvalidOptions(_) => "E_BAD_OPTIONS",
            StreamFilterError::DecidedTwice => "E_DECIDED_TWICE",
            StreamFilterError::DecidedAfterPromise => "E_DECIDED_AFTER_PROMISE",
            StreamFilterError::DecisionDropped => "E_DECISION_DROPPED",
            StreamFilterError::PredicateRejected(_) => "E_PREDICATE_REJECTED",
            StreamFilterError::EnqueueAfterEnd => "E_ENQUEUE_AFTER_END",
            StreamFilterError::DeliveryWithoutDemand => "E_DELIVERY_WITHOUT_DEMAND",
            StreamFilterError::WriteAfterFinish => "E_WRITE_AFTER_FINISH",
            StreamFilterError::StreamEnded => "E_STREAM_ENDED",
            StreamFilterError::OverlappingProcess => "E_OVERLAPPING_PROCESS",
            StreamFilterError::Aborted => "E_ABORTED",
        }
    }
}

impl core::fmt::Display for StreamFilterError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StreamFilterError::BadPredicate(got) => {
                write!(f, "Filter predicate must be a function (got {})", got)
            }
            StreamFilterError::InvalidOptions(reason) => write!(f, "Invalid options: {}", reason),
            StreamFilterError::DecidedTwice => write!(f, "Predicate decided more than once"),
            StreamFilterError::DecidedAfterPromise => {
                write!(f, "Predicate called decide after returning a promise")
            }
            StreamFilterError::DecisionDropped => {
                write!(f, "Predicate dropped its decision without deciding")
            }
            StreamFilterError::PredicateRejected(reason) => {
                write!(f, "Predicate failed: {}", reason)
            }
            StreamFilterError::EnqueueAfterEnd => write!(f, "Enqueue after end of stream"),
            StreamFilterError::DeliveryWithoutDemand => {
                write!(f, "Delivery attempted without consumer demand")
            }
            StreamFilterError::WriteAfterFinish => write!(f, "Write after the writer finished"),
            StreamFilterError::StreamEnded => write!(f, "Filter stream already ended"),
            StreamFilterError::OverlappingProcess => {
                write!(f, "Item processed while the previous one is still outstanding")
            }
            StreamFilterError::Aborted => write!(f, "Stream aborted"),
        }
    }
}

impl core::error::Error for StreamFilterError {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_kind_grouping() {
        assert_eq!(
            StreamFilterError::BadPredicate("undefined".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(StreamFilterError::DecidedTwice.kind(), ErrorKind::PredicateProtocol);
        assert_eq!(StreamFilterError::EnqueueAfterEnd.kind(), ErrorKind::SchedulerProtocol);
        assert_eq!(StreamFilterError::Aborted.kind(), ErrorKind::Aborted);
    }

    #[test]
    fn test_bad_predicate_code_and_message() {
        let err = StreamFilterError::BadPredicate("number".into());
        assert_eq!(err.code(), "E_BAD_FILTER_CALLBACK");
        assert_eq!(err.to_string(), "Filter predicate must be a function (got number)");
    }
}
