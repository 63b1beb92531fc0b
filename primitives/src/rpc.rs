//! The signed-JSON-array RPC envelope.
//!
//! Every wire message is an object carrying exactly one of `"req"` / `"res"`
//! with a 4-element array `[request_id, method, params, timestamp]`, plus
//! `"sig"`, a list of 65-byte hex signatures. The bytes that get signed are
//! the canonical JSON of the 4-element array alone, so [`Payload`]
//! serialization must stay deterministic: array order as declared, object key
//! order as received (`serde_json` with `preserve_order`), no whitespace.

use chrono::Utc;
use parse_display::{Display, FromStr};
use rust_decimal::Decimal;
use serde::{
    de,
    ser::{SerializeMap, SerializeSeq},
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value;

use crate::{
    AccountId, Address, AppDefinition, ChainId, ChannelId, SessionId, SessionStatus, Signature,
};

/// Known RPC methods, including the server-pushed notification kinds.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq)]
#[display(style = "snake_case")]
pub enum Method {
    AuthRequest,
    AuthChallenge,
    AuthVerify,
    Ping,
    Pong,
    GetConfig,
    GetLedgerBalances,
    GetChannels,
    GetAppDefinition,
    GetRpcHistory,
    CreateAppSession,
    CloseAppSession,
    ResizeChannel,
    CloseChannel,
    #[display("bu")]
    BalanceUpdate,
    #[display("cu")]
    ChannelUpdate,
    Error,
}

/// Error kinds surfaced to the peer in an `"error"` response.
#[derive(Debug, Display, FromStr, Clone, Copy, PartialEq, Eq)]
#[display(style = "kebab-case")]
pub enum ErrorKind {
    FailsMalformed,
    FailsUnauthenticated,
    FailsInvalidSignature,
    FailsMissingParameter,
    FailsInsufficientFunds,
    FailsQuorumNotMet,
    FailsAllocationMismatch,
    FailsNotFound,
    FailsConflict,
    FailsResizeFirst,
    FailsInternal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    fn key(self) -> &'static str {
        match self {
            MessageKind::Request => "req",
            MessageKind::Response => "res",
        }
    }
}

/// The signable 4-element array of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub request_id: u64,
    pub method: String,
    pub params: Vec<Value>,
    pub timestamp: u64,
}

impl Payload {
    /// Canonical JSON of `[request_id, method, params, timestamp]`; the bytes
    /// every signature in the envelope is made over.
    pub fn signable_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("a payload always serializes")
    }

    /// First params element deserialized into the method's named arguments.
    /// Absent params read as an empty object, so optional arguments default
    /// and required ones surface as missing fields.
    pub fn named_params<T: de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let first = self
            .params
            .first()
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        serde_json::from_value(first)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.request_id)?;
        seq.serialize_element(&self.method)?;
        seq.serialize_element(&self.params)?;
        seq.serialize_element(&self.timestamp)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (request_id, method, params, timestamp) =
            <(u64, String, Vec<Value>, u64)>::deserialize(deserializer)?;

        Ok(Self {
            request_id,
            method,
            params,
            timestamp,
        })
    }
}

/// A complete wire message: payload plus its signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Payload,
    pub signatures: Vec<Signature>,
}

impl Message {
    pub fn request(request_id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            kind: MessageKind::Request,
            payload: Payload {
                request_id,
                method: method.to_string(),
                params,
                timestamp: now_secs(),
            },
            signatures: vec![],
        }
    }

    pub fn response(request_id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            kind: MessageKind::Response,
            payload: Payload {
                request_id,
                method: method.to_string(),
                params,
                timestamp: now_secs(),
            },
            signatures: vec![],
        }
    }

    /// An `"error"` response carrying the wire error kind.
    pub fn error_response(request_id: u64, kind: ErrorKind) -> Self {
        let params = vec![serde_json::json!({ "error": kind.to_string() })];

        Self::response(request_id, &Method::Error.to_string(), params)
    }

    /// An unsolicited server push (`bu` / `cu`); request id is always zero.
    pub fn notification(method: Method, params: Vec<Value>) -> Self {
        Self::response(0, &method.to_string(), params)
    }

    pub fn parse(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("a message always serializes")
    }

    pub fn method(&self) -> Option<Method> {
        self.payload.method.parse().ok()
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(self.kind.key(), &self.payload)?;
        map.serialize_entry("sig", &self.signatures)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct RawMessage {
            #[serde(default)]
            req: Option<Payload>,
            #[serde(default)]
            res: Option<Payload>,
            #[serde(default)]
            sig: Vec<Signature>,
        }

        let raw = RawMessage::deserialize(deserializer)?;

        let (kind, payload) = match (raw.req, raw.res) {
            (Some(payload), None) => (MessageKind::Request, payload),
            (None, Some(payload)) => (MessageKind::Response, payload),
            _ => {
                return Err(de::Error::custom(
                    "message must contain exactly one of \"req\" or \"res\"",
                ))
            }
        };

        Ok(Self {
            kind,
            payload,
            signatures: raw.sig,
        })
    }
}

pub fn now_secs() -> u64 {
    Utc::now().timestamp() as u64
}

// ---- method parameter and response shapes ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequestParams {
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallengeResponse {
    pub challenge_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthVerifyParams {
    pub address: Address,
    pub challenge: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthVerifyResponse {
    pub address: Address,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub chain_id: ChainId,
    pub custody_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub broker_address: Address,
    pub networks: Vec<NetworkInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLedgerBalancesParams {
    #[serde(default)]
    pub acc: Option<AccountId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetChannelsParams {
    pub participant: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAppDefinitionParams {
    pub acc: SessionId,
}

/// One participant's stake in a session, stated at open and close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppAllocation {
    pub participant: Address,
    pub asset_symbol: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAppSessionParams {
    pub definition: AppDefinition,
    pub allocations: Vec<AppAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAppSessionParams {
    pub app_session_id: SessionId,
    pub allocations: Vec<AppAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSessionResponse {
    pub app_session_id: SessionId,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeChannelParams {
    pub channel_id: ChannelId,
    pub participant_change: Decimal,
    pub funds_destination: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseChannelParams {
    pub channel_id: ChannelId,
    pub funds_destination: Address,
}

/// The broker's signature over a state hash, split for on-chain use.
/// `v` is in the electrum form (`27`/`28`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSignature {
    pub v: u8,
    pub r: String,
    pub s: String,
}

impl From<&Signature> for StateSignature {
    fn from(signature: &Signature) -> Self {
        Self {
            v: signature.v() + 27,
            r: format!("0x{}", hex::encode(signature.r())),
            s: format!("0x{}", hex::encode(signature.s())),
        }
    }
}

/// A destination's share of the channel deposit, in token base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireAllocation {
    pub destination: Address,
    pub token: Address,
    #[serde(with = "u128_string")]
    pub amount: u128,
}

/// Broker-signed state transition returned by `resize_channel` and
/// `close_channel`; everything the participant needs to drive the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStateResponse {
    pub channel_id: ChannelId,
    pub intent: u8,
    pub version: u64,
    pub state_data: String,
    pub allocations: Vec<WireAllocation>,
    pub state_hash: String,
    pub server_signature: StateSignature,
}

/// One audit-log record returned by `get_rpc_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcEntry {
    pub id: u64,
    pub sender: Address,
    pub req_id: u64,
    pub method: String,
    pub params: String,
    pub timestamp: u64,
    pub req_sig: Vec<String>,
    pub response: String,
    pub res_sig: Vec<String>,
}

mod u128_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let value = String::deserialize(deserializer)?;

        value.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn signable_bytes_are_the_canonical_array() {
        let payload = Payload {
            request_id: 1,
            method: "ping".to_string(),
            params: vec![],
            timestamp: 1_700_000_000,
        };

        assert_eq!(
            br#"[1,"ping",[],1700000000]"#.to_vec(),
            payload.signable_bytes()
        );
    }

    #[test]
    fn signable_bytes_preserve_object_key_order() {
        let message = Message::parse(
            br#"{"req":[7,"auth_verify",[{"address":"0xce07CbB7e054514D590a0262C93070D838bFBA2e","challenge":"abc"}],42],"sig":[]}"#,
        )
        .expect("parses");

        assert_eq!(
            br#"[7,"auth_verify",[{"address":"0xce07CbB7e054514D590a0262C93070D838bFBA2e","challenge":"abc"}],42]"#.to_vec(),
            message.payload.signable_bytes()
        );

        // a pure function of the 4-element array
        assert_eq!(
            message.payload.signable_bytes(),
            message.payload.signable_bytes()
        );
    }

    #[test]
    fn envelope_round_trip() {
        let hex_sig = format!("0x{}", "ab".repeat(64) + "1c");
        let wire = format!(
            r#"{{"req":[1,"ping",[],1700000000],"sig":["{}"]}}"#,
            hex_sig
        );

        let message = Message::parse(wire.as_bytes()).expect("parses");
        assert_eq!(MessageKind::Request, message.kind);
        assert_eq!(Some(Method::Ping), message.method());
        assert_eq!(1, message.signatures.len());
        // electrum v (0x1c = 28) normalizes to recovery id 1
        assert_eq!(1, message.signatures[0].v());

        let reserialized = message.to_vec();
        let reparsed = Message::parse(&reserialized).expect("parses its own output");
        assert_eq!(message, reparsed);
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        // both req and res
        assert!(Message::parse(br#"{"req":[1,"ping",[],1],"res":[1,"pong",[],1],"sig":[]}"#)
            .is_err());
        // neither
        assert!(Message::parse(br#"{"sig":[]}"#).is_err());
        // wrong array length
        assert!(Message::parse(br#"{"req":[1,"ping",[]],"sig":[]}"#).is_err());
        // wrong id type
        assert!(Message::parse(br#"{"req":["one","ping",[],1],"sig":[]}"#).is_err());
        assert!(Message::parse(b"not json").is_err());
    }

    #[test]
    fn error_response_shape() {
        let message = Message::error_response(9, ErrorKind::FailsQuorumNotMet);

        assert_eq!(MessageKind::Response, message.kind);
        assert_eq!(Some(Method::Error), message.method());
        assert_eq!(
            vec![json!({"error": "fails-quorum-not-met"})],
            message.payload.params
        );
    }

    #[test]
    fn method_strings() {
        assert_eq!("create_app_session", Method::CreateAppSession.to_string());
        assert_eq!("bu", Method::BalanceUpdate.to_string());
        assert_eq!(Ok(Method::ChannelUpdate), "cu".parse());
        assert!("definitely_not_a_method".parse::<Method>().is_err());
    }

    #[test]
    fn named_params_deserialize_from_first_element() {
        let message = Message::parse(
            br#"{"req":[3,"get_channels",[{"participant":"0xce07CbB7e054514D590a0262C93070D838bFBA2e"}],10],"sig":[]}"#,
        )
        .expect("parses");

        let params: GetChannelsParams = message
            .payload
            .named_params()
            .expect("valid params");
        assert_eq!(
            "0xce07CbB7e054514D590a0262C93070D838bFBA2e",
            params.participant.to_checksum()
        );
    }

    #[test]
    fn wire_allocation_amount_is_a_string() {
        let allocation = WireAllocation {
            destination: *crate::test_util::ALICE,
            token: *crate::test_util::TOKEN_USDC,
            amount: 100_000_000,
        };

        let json = serde_json::to_value(&allocation).expect("serializes");
        assert_eq!(json!("100000000"), json["amount"]);

        let back: WireAllocation =
            serde_json::from_value(json).expect("deserializes");
        assert_eq!(allocation, back);
    }
}
