use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

/// Marker the server embeds in a GCG move line when a move could not be
/// resolved; score calculation is invalid from that move on.
pub const UNKNOWN_MOVE_MARKER: &str = "(unknown)";

/// Lifecycle phase of the observed game, display-grade only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GamePhase {
    Start,
    /// A player's clock is running (0 or 1).
    Thinking(u8),
    /// The game is paused on a player's turn (0 or 1).
    Paused(u8),
    Ended,
    Other(String),
}

impl GamePhase {
    pub fn parse(value: &str) -> Self {
        match value {
            "START" => GamePhase::Start,
            "S0" => GamePhase::Thinking(0),
            "S1" => GamePhase::Thinking(1),
            "P0" => GamePhase::Paused(0),
            "P1" => GamePhase::Paused(1),
            "EOG" => GamePhase::Ended,
            other => GamePhase::Other(other.to_string()),
        }
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GamePhase::Start => write!(f, "START"),
            GamePhase::Thinking(player) => write!(f, "S{player}"),
            GamePhase::Paused(player) => write!(f, "P{player}"),
            GamePhase::Ended => write!(f, "EOG"),
            GamePhase::Other(value) => write!(f, "{value}"),
        }
    }
}

/// Wire shape of a status payload as served by the pull endpoint and pushed
/// over the socket. Optional fields cover older protocol revisions; they are
/// backfilled once, in [`RawStatus::finalize`], never at call sites.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStatus {
    #[serde(default)]
    pub api: String,
    #[serde(default)]
    pub state: String,
    /// Server-side creation time, fractional seconds (api >= 3.0).
    #[serde(default)]
    pub timestamp: Option<f64>,
    /// Timestamp of the current move.
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub name1: String,
    #[serde(default)]
    pub name2: String,
    #[serde(default)]
    pub onmove: String,
    #[serde(rename = "move", default)]
    pub move_index: u32,
    #[serde(default)]
    pub score1: i32,
    #[serde(default)]
    pub score2: i32,
    #[serde(default)]
    pub time1: i32,
    #[serde(default)]
    pub time2: i32,
    /// Remaining seconds per player (api >= 3.1).
    #[serde(default)]
    pub clock1: Option<i32>,
    #[serde(default)]
    pub clock2: Option<i32>,
    #[serde(default)]
    pub board: BTreeMap<String, String>,
    #[serde(default)]
    pub moves: Vec<String>,
    #[serde(default)]
    pub bag: Vec<String>,
    /// Whether the move log contains an unresolved move (api >= 3.1).
    #[serde(default)]
    pub unknown_move: Option<bool>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub tournament: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl RawStatus {
    /// Backfill fields older protocol revisions omit and freeze the result.
    ///
    /// `max_time` is the per-player time budget the clocks count down from.
    pub fn finalize(self, max_time: i32) -> StatusSnapshot {
        let unknown_move = self
            .unknown_move
            .unwrap_or_else(|| has_unknown_move(&self.moves));
        let clock1 = self.clock1.unwrap_or(max_time - self.time1);
        let clock2 = self.clock2.unwrap_or(max_time - self.time2);
        StatusSnapshot {
            api: self.api,
            phase: GamePhase::parse(&self.state),
            timestamp: self.timestamp,
            move_time: self.time,
            name1: self.name1,
            name2: self.name2,
            onmove: self.onmove,
            move_index: self.move_index,
            score1: self.score1,
            score2: self.score2,
            time1: self.time1,
            time2: self.time2,
            clock1,
            clock2,
            board: self.board,
            moves: self.moves,
            bag: self.bag,
            unknown_move,
            commit: self.commit,
            layout: self.layout,
            tournament: self.tournament,
            image: self.image,
        }
    }
}

/// One authoritative point-in-time description of the game. Immutable once
/// constructed; the coordinator replaces it wholesale on every accepted
/// update.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub api: String,
    pub phase: GamePhase,
    pub timestamp: Option<f64>,
    pub move_time: String,
    pub name1: String,
    pub name2: String,
    pub onmove: String,
    pub move_index: u32,
    pub score1: i32,
    pub score2: i32,
    pub time1: i32,
    pub time2: i32,
    pub clock1: i32,
    pub clock2: i32,
    /// Coordinate ("a1".."o15") to tile letter.
    pub board: BTreeMap<String, String>,
    /// Ordered GCG move log.
    pub moves: Vec<String>,
    pub bag: Vec<String>,
    pub unknown_move: bool,
    pub commit: Option<String>,
    pub layout: Option<String>,
    pub tournament: Option<String>,
    pub image: Option<String>,
}

/// Scan the move log for the unresolved-move marker.
pub fn has_unknown_move(moves: &[String]) -> bool {
    moves.iter().any(|line| line.contains(UNKNOWN_MOVE_MARKER))
}

/// Envelope some server revisions wrap push messages in.
#[derive(Debug, Deserialize)]
struct PushEnvelope {
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    clock1: Option<i32>,
    #[serde(default)]
    clock2: Option<i32>,
    status: RawStatus,
}

/// Parse a push message, accepting both the flat snapshot shape and the
/// enveloped `{"op": .., "clock1": .., "clock2": .., "status": {..}}` form.
pub fn parse_push_message(text: &str) -> Result<RawStatus, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("status").is_some() {
        let envelope: PushEnvelope = serde_json::from_value(value)?;
        let mut raw = envelope.status;
        if raw.clock1.is_none() {
            raw.clock1 = envelope.clock1;
        }
        if raw.clock2.is_none() {
            raw.clock2 = envelope.clock2;
        }
        if raw.state.is_empty() {
            if let Some(op) = envelope.op {
                raw.state = op;
            }
        }
        Ok(raw)
    } else {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawStatus {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_phase_parse_round_trip() {
        for code in ["START", "S0", "S1", "P0", "P1", "EOG"] {
            assert_eq!(GamePhase::parse(code).to_string(), code);
        }
        assert_eq!(
            GamePhase::parse("MAINTENANCE"),
            GamePhase::Other("MAINTENANCE".to_string())
        );
    }

    #[test]
    fn test_has_unknown_move() {
        let moves = vec![
            "> Anna: H8 AXE +42 42".to_string(),
            "> Ben: (unknown) +0 37".to_string(),
        ];
        assert!(has_unknown_move(&moves));
        assert!(!has_unknown_move(&moves[..1]));
        assert!(!has_unknown_move(&[]));
    }

    #[test]
    fn test_finalize_backfills_missing_fields() {
        let raw = raw(json!({
            "api": "3.0",
            "state": "S1",
            "time": "2025-01-01 12:00:00",
            "name1": "Anna",
            "name2": "Ben",
            "onmove": "Ben",
            "move": 4,
            "score1": 42,
            "score2": 37,
            "time1": 120,
            "time2": 95,
            "board": {"h8": "A"},
            "moves": ["> Anna: H8 AXE +42 42", "> Ben: (unknown) +0 37"],
            "bag": ["E", "N"]
        }));
        let snapshot = raw.finalize(1800);
        assert!(snapshot.unknown_move);
        assert_eq!(snapshot.clock1, 1680);
        assert_eq!(snapshot.clock2, 1705);
        assert_eq!(snapshot.phase, GamePhase::Thinking(1));
        assert!(snapshot.timestamp.is_none());
    }

    #[test]
    fn test_finalize_keeps_explicit_fields() {
        let raw = raw(json!({
            "api": "3.1",
            "state": "S0",
            "timestamp": 171.25,
            "time1": 120,
            "time2": 95,
            "clock1": 999,
            "clock2": 998,
            "moves": ["> Ben: (unknown) +0 37"],
            "unknown_move": false
        }));
        let snapshot = raw.finalize(1800);
        // server-sent values win over the derivation
        assert!(!snapshot.unknown_move);
        assert_eq!(snapshot.clock1, 999);
        assert_eq!(snapshot.clock2, 998);
        assert_eq!(snapshot.timestamp, Some(171.25));
    }

    #[test]
    fn test_tolerates_sparse_legacy_payload() {
        // pre-3.0 servers send only the game fields
        let raw = raw(json!({
            "time": "12:00:00",
            "move": 1,
            "score1": 10,
            "score2": 0,
            "time1": 30,
            "time2": 0,
            "name1": "Spieler1",
            "name2": "Spieler2",
            "onmove": "Spieler1",
            "moves": [],
            "board": {},
            "bag": []
        }));
        let snapshot = raw.finalize(1800);
        assert_eq!(snapshot.api, "");
        assert_eq!(snapshot.phase, GamePhase::Other(String::new()));
        assert_eq!(snapshot.clock1, 1770);
        assert!(!snapshot.unknown_move);
    }

    #[test]
    fn test_parse_push_message_flat() {
        let raw = parse_push_message(r#"{"move": 3, "time1": 60, "time2": 40}"#).unwrap();
        assert_eq!(raw.move_index, 3);
    }

    #[test]
    fn test_parse_push_message_envelope() {
        let text = r#"{
            "op": "S0",
            "clock1": 1700,
            "clock2": 1650,
            "status": {"move": 7, "time1": 100, "time2": 150}
        }"#;
        let raw = parse_push_message(text).unwrap();
        assert_eq!(raw.move_index, 7);
        assert_eq!(raw.state, "S0");
        assert_eq!(raw.clock1, Some(1700));
        assert_eq!(raw.clock2, Some(1650));
    }

    #[test]
    fn test_parse_push_message_rejects_garbage() {
        assert!(parse_push_message("{not json").is_err());
        assert!(parse_push_message("[1, 2, 3]").is_err());
    }
}
