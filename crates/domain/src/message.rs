//! # メッセージ
//!
//! 配信対象メッセージのレコードと、その配信状態に関するルールを定義する。
//!
//! ## ライフサイクル
//!
//! ```text
//! 作成（未送信, retried_count = 0）
//!   ├─ 配信成功 → 送信済み（sent_at を一度だけ設定、以後不変）
//!   └─ 配信失敗 → 未送信のまま log に追記
//!        └─ 再送スイープ → retried_count += 1（max_retries に達したら対象外）
//! ```
//!
//! 明示的な「失敗」終端状態は持たない。`retried_count == max_retries` で
//! 未送信のレコードは、以後どのスイープにも選ばれない。
//!
//! ## 不変条件
//!
//! - `sent_at` は一度設定されたら変わらない
//! - `retried_count` は単調非減少で、スイープ 1 回につき 1 だけ増える
//! - `log` は追記のみで、上書きされない

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use uuid::Uuid;

use crate::{
    DomainError,
    notification::{EmailMessage, SmsMessage},
};

/// メッセージ ID
///
/// messages テーブルの主キーで、配信イベントに載る唯一の情報でもある。
/// 作成時に UUID v7 で採番するため、ID 順はおおよそ作成順になる。
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(transparent)]
#[display("{_0}")]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// DB やストリームから読んだ UUID を ID として扱う
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// メッセージ種別
///
/// messages テーブルの `kind` カラムと、配信イベントのトピック名に使う。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    Email,
    Sms,
}

/// 送信ペイロード
///
/// このコアにとって中身は不透明。送信ゲートウェイだけが解釈する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    Email(EmailMessage),
    Sms(SmsMessage),
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Email(_) => MessageKind::Email,
            Self::Sms(_) => MessageKind::Sms,
        }
    }

    /// ペイロードを検証する
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Self::Email(email) => email.validate(),
            Self::Sms(sms) => sms.validate(),
        }
    }
}

/// 配信イベント
///
/// 作成時と再送スイープ時にブローカーへ発行される。ID のみを運び、
/// ワーカーは受信時にストアから最新のレコードを読み直す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub id: MessageId,
}

impl DispatchEvent {
    pub fn new(id: MessageId) -> Self {
        Self { id }
    }
}

/// 再送ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 再送回数の上限
    pub max_retries: u32,
    /// 猶予時間。最後の作成・更新からこの時間が経つまで再送対象にしない
    pub grace:       Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(max_retries: u32, grace: Duration) -> Self {
        Self { max_retries, grace }
    }

    /// `now` 時点の締め切り（`now - grace`）を返す
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.grace
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRIES, Duration::seconds(60))
    }
}

/// メッセージエンティティ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id:            MessageId,
    payload:       MessagePayload,
    created_at:    DateTime<Utc>,
    updated_at:    DateTime<Utc>,
    sent_at:       Option<DateTime<Utc>>,
    retried_count: u32,
    log:           Option<String>,
}

/// メッセージの新規作成パラメータ
pub struct NewMessage {
    pub id:      MessageId,
    pub payload: MessagePayload,
    pub now:     DateTime<Utc>,
}

/// メッセージの DB 復元パラメータ
pub struct MessageRecord {
    pub id:            MessageId,
    pub payload:       MessagePayload,
    pub created_at:    DateTime<Utc>,
    pub updated_at:    DateTime<Utc>,
    pub sent_at:       Option<DateTime<Utc>>,
    pub retried_count: u32,
    pub log:           Option<String>,
}

impl Message {
    /// 新しい未送信メッセージを作成する
    pub fn new(params: NewMessage) -> Self {
        Self {
            id:            params.id,
            payload:       params.payload,
            created_at:    params.now,
            updated_at:    params.now,
            sent_at:       None,
            retried_count: 0,
            log:           None,
        }
    }

    /// 既存のデータから復元する
    pub fn from_db(record: MessageRecord) -> Self {
        Self {
            id:            record.id,
            payload:       record.payload,
            created_at:    record.created_at,
            updated_at:    record.updated_at,
            sent_at:       record.sent_at,
            retried_count: record.retried_count,
            log:           record.log,
        }
    }

    // Getter メソッド

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &MessagePayload {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn retried_count(&self) -> u32 {
        self.retried_count
    }

    pub fn log(&self) -> Option<&str> {
        self.log.as_deref()
    }

    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    /// 再送対象かどうかを判定する
    ///
    /// 未送信かつ上限未満で、未再送なら `created_at`、再送済みなら
    /// `updated_at` が `cutoff` より前であるものが対象になる。
    pub fn is_resend_eligible(&self, cutoff: DateTime<Utc>, max_retries: u32) -> bool {
        if self.is_sent() || self.retried_count >= max_retries {
            return false;
        }
        if self.retried_count == 0 {
            self.created_at < cutoff
        } else {
            self.updated_at < cutoff
        }
    }

    // ===== 状態遷移（インメモリストア用） =====
    //
    // 永続化実装は同じ遷移を単一の条件付き UPDATE 文で行う。

    /// 未送信なら送信済みにする。既に送信済みなら何もせず `false` を返す
    pub fn mark_sent(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_sent() {
            return false;
        }
        self.sent_at = Some(now);
        self.updated_at = now;
        true
    }

    /// 配信失敗のログを追記する
    pub fn append_failure(&mut self, entry: &str, now: DateTime<Utc>) {
        self.log.get_or_insert_with(String::new).push_str(entry);
        self.updated_at = now;
    }

    /// 再送回数を 1 増やす
    pub fn increment_retry(&mut self, now: DateTime<Utc>) {
        self.retried_count += 1;
        self.updated_at = now;
    }
}

/// 配信失敗のログエントリを整形する
///
/// 各エントリは空行で区切られ、追記順に読める。
pub fn failure_log_entry(error: &impl std::fmt::Display) -> String {
    format!("\n\n{error}")
}

/// メッセージ検索条件
///
/// ストアの問い合わせ述語。インメモリ実装は [`matches`](Self::matches) を、
/// SQL 実装は同じ条件の WHERE 句を使う。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageQuery {
    /// ID による単一検索
    ById(MessageId),
    /// 再送スイープの対象検索
    ResendCandidates {
        kind:        MessageKind,
        cutoff:      DateTime<Utc>,
        max_retries: u32,
    },
}

impl MessageQuery {
    /// `now` 時点の再送対象検索条件を作る
    pub fn resend_candidates(kind: MessageKind, policy: &RetryPolicy, now: DateTime<Utc>) -> Self {
        Self::ResendCandidates {
            kind,
            cutoff: policy.cutoff(now),
            max_retries: policy.max_retries,
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Self::ById(id) => message.id() == id,
            Self::ResendCandidates {
                kind,
                cutoff,
                max_retries,
            } => message.kind() == *kind && message.is_resend_eligible(*cutoff, *max_retries),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn sms_payload() -> MessagePayload {
        MessagePayload::Sms(SmsMessage {
            phone_number: "+819012345678".to_string(),
            message:      "認証コード: 123456".to_string(),
        })
    }

    fn make_message(
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        sent_at: Option<DateTime<Utc>>,
        retried_count: u32,
    ) -> Message {
        Message::from_db(MessageRecord {
            id: MessageId::new(),
            payload: sms_payload(),
            created_at,
            updated_at,
            sent_at,
            retried_count,
            log: None,
        })
    }

    #[rstest]
    fn test_新規作成の初期状態(t0: DateTime<Utc>) {
        let id = MessageId::new();
        let sut = Message::new(NewMessage {
            id:      id.clone(),
            payload: sms_payload(),
            now:     t0,
        });

        let expected = Message::from_db(MessageRecord {
            id,
            payload: sms_payload(),
            created_at: t0,
            updated_at: t0,
            sent_at: None,
            retried_count: 0,
            log: None,
        });
        assert_eq!(sut, expected);
        assert_eq!(sut.kind(), MessageKind::Sms);
    }

    mod resend_eligibility {
        use super::*;

        #[rstest]
        fn test_未再送で作成から猶予を過ぎたものは対象(t0: DateTime<Utc>) {
            let message = make_message(t0, t0, None, 0);
            let cutoff = t0 + Duration::seconds(1);
            assert!(message.is_resend_eligible(cutoff, 3));
        }

        #[rstest]
        fn test_締め切りちょうどに作成されたものは対象外(t0: DateTime<Utc>) {
            let message = make_message(t0, t0, None, 0);
            assert!(!message.is_resend_eligible(t0, 3));
        }

        #[rstest]
        fn test_再送済みはupdated_atで判定する(t0: DateTime<Utc>) {
            let cutoff = t0 + Duration::seconds(60);
            let recent = make_message(t0, t0 + Duration::seconds(90), None, 1);
            let stale = make_message(t0, t0 + Duration::seconds(30), None, 1);

            assert!(!recent.is_resend_eligible(cutoff, 3));
            assert!(stale.is_resend_eligible(cutoff, 3));
        }

        #[rstest]
        fn test_上限に達したものはタイムスタンプに関わらず対象外(t0: DateTime<Utc>) {
            let message = make_message(t0, t0, None, 3);
            let far_future = t0 + Duration::days(365);
            assert!(!message.is_resend_eligible(far_future, 3));
        }

        #[rstest]
        fn test_送信済みは対象外(t0: DateTime<Utc>) {
            let message = make_message(t0, t0, Some(t0), 0);
            let far_future = t0 + Duration::days(365);
            assert!(!message.is_resend_eligible(far_future, 3));
        }
    }

    mod transitions {
        use pretty_assertions::assert_eq;

        use super::*;

        #[rstest]
        fn test_mark_sentは二回目以降sent_atを変えない(t0: DateTime<Utc>) {
            let mut message = make_message(t0, t0, None, 0);

            assert!(message.mark_sent(t0 + Duration::seconds(5)));
            assert!(!message.mark_sent(t0 + Duration::seconds(10)));

            assert_eq!(message.sent_at(), Some(t0 + Duration::seconds(5)));
            assert_eq!(message.updated_at(), t0 + Duration::seconds(5));
        }

        #[rstest]
        fn test_append_failureは呼び出し順に連結する(t0: DateTime<Utc>) {
            let mut message = make_message(t0, t0, None, 0);

            message.append_failure(&failure_log_entry(&"first"), t0 + Duration::seconds(1));
            message.append_failure(&failure_log_entry(&"second"), t0 + Duration::seconds(2));

            assert_eq!(message.log(), Some("\n\nfirst\n\nsecond"));
            assert_eq!(message.updated_at(), t0 + Duration::seconds(2));
            assert_eq!(message.retried_count(), 0);
            assert_eq!(message.sent_at(), None);
        }

        #[rstest]
        fn test_increment_retryは1ずつ増やす(t0: DateTime<Utc>) {
            let mut message = make_message(t0, t0, None, 1);

            message.increment_retry(t0 + Duration::seconds(1));
            message.increment_retry(t0 + Duration::seconds(2));

            assert_eq!(message.retried_count(), 3);
            assert_eq!(message.updated_at(), t0 + Duration::seconds(2));
        }
    }

    mod query {
        use super::*;

        #[rstest]
        fn test_resend_candidatesは種別も条件に含める(t0: DateTime<Utc>) {
            let message = make_message(t0, t0, None, 0);
            let now = t0 + Duration::seconds(61);
            let policy = RetryPolicy::default();

            let sms = MessageQuery::resend_candidates(MessageKind::Sms, &policy, now);
            let email = MessageQuery::resend_candidates(MessageKind::Email, &policy, now);

            assert!(sms.matches(&message));
            assert!(!email.matches(&message));
        }

        #[rstest]
        fn test_by_idは一致するidだけを返す(t0: DateTime<Utc>) {
            let message = make_message(t0, t0, None, 0);

            assert!(MessageQuery::ById(message.id().clone()).matches(&message));
            assert!(!MessageQuery::ById(MessageId::new()).matches(&message));
        }
    }

    #[test]
    fn test_message_kindの文字列変換() {
        use std::str::FromStr;

        assert_eq!(MessageKind::Email.to_string(), "email");
        assert_eq!(MessageKind::Sms.to_string(), "sms");
        assert_eq!(MessageKind::from_str("sms").unwrap(), MessageKind::Sms);
    }

    #[test]
    fn test_payloadはkindタグ付きでシリアライズされる() {
        let json = serde_json::to_value(sms_payload()).unwrap();
        assert_eq!(json["kind"], "sms");
        assert_eq!(json["phone_number"], "+819012345678");

        let restored: MessagePayload = serde_json::from_value(json).unwrap();
        assert_eq!(restored, sms_payload());
    }
}
