//! # Field Validation
//!
//! Shape, range and whitelist checks on individual submission fields.
//!
//! ## Philosophy
//!
//! Every input arrives as untyped JSON. Each validator either returns the
//! normalized, typed value or an [`InvalidField`] with a human reason. They
//! never panic and never touch I/O, so they can run in any order or in
//! parallel.
//!
//! The username charset is already narrow enough to exclude markup and
//! quoting characters; the markup / keyword / strip checks after it are kept
//! as a second layer in case the charset is ever widened.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::difficulty::Difficulty;
use crate::model::{BoardSize, GameSessionClaim, GameState};

/// Longest raw username accepted before any processing.
pub const MAX_RAW_USERNAME_CHARS: usize = 100;

/// Longest username after trimming, in code points.
pub const MAX_USERNAME_CHARS: usize = 16;

/// Longest raw time string.
pub const MAX_TIME_STRING_LEN: usize = 20;

/// Fastest time accepted by the validator (seconds).
pub const MIN_TIME_SECS: f64 = 0.1;

/// Slowest time accepted by the validator (seconds).
pub const MAX_TIME_SECS: f64 = 9999.0;

/// Maximum decimal digits in a time.
pub const MAX_TIME_DECIMALS: usize = 3;

/// Longest raw difficulty string.
pub const MAX_DIFFICULTY_LEN: usize = 50;

/// Largest serialized game-data envelope in bytes.
pub const MAX_GAME_DATA_BYTES: usize = 10_000;

/// Longest game id.
pub const MAX_GAME_ID_LEN: usize = 100;

/// Fields every game-data envelope must carry.
pub const REQUIRED_GAME_FIELDS: [&str; 10] = [
    "difficulty",
    "time",
    "moves",
    "gameId",
    "timestamp",
    "boardSize",
    "mineCount",
    "gameEndTime",
    "firstClickTime",
    "gameState",
];

/// Whole-word tokens refused in usernames.
const RESERVED_WORDS: [&str; 8] = [
    "select", "insert", "update", "delete", "drop", "union", "script", "alert",
];

/// Characters that must never survive into a stored name.
const STRIPPED_CHARS: [char; 5] = ['<', '>', '\'', '"', '&'];

/// A rejected field.
///
/// The reason is for server logs; clients only ever see the error code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{reason}")]
pub struct InvalidField {
    /// Why the field was refused.
    pub reason: &'static str,
}

impl InvalidField {
    const fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// Result of a single field check.
pub type FieldResult<T> = Result<T, InvalidField>;

// =============================================================================
// USERNAME
// =============================================================================

/// Validates and trims a username.
///
/// # Errors
///
/// Returns [`InvalidField`] when the value is not a string, is too long,
/// empty after trimming, uses characters outside letters / digits / CJK
/// ideographs / `_` / `-`, or trips the markup and reserved-word filters.
pub fn validate_username(input: &Value) -> FieldResult<String> {
    let Value::String(raw) = input else {
        return Err(InvalidField::new("username must be a string"));
    };

    if raw.chars().count() > MAX_RAW_USERNAME_CHARS {
        return Err(InvalidField::new("input too long"));
    }

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InvalidField::new("username cannot be empty"));
    }

    if trimmed.chars().count() > MAX_USERNAME_CHARS {
        return Err(InvalidField::new("username too long"));
    }

    if !trimmed.chars().all(is_username_char) {
        return Err(InvalidField::new("username contains invalid characters"));
    }

    if trimmed.chars().all(|c| c == '_' || c == '-') {
        return Err(InvalidField::new("username must contain a letter or digit"));
    }

    if contains_markup(trimmed) {
        return Err(InvalidField::new("username contains invalid content"));
    }

    if contains_reserved_word(trimmed) {
        return Err(InvalidField::new("username contains a reserved word"));
    }

    if trimmed.contains(STRIPPED_CHARS) {
        return Err(InvalidField::new("username contains special characters"));
    }

    Ok(trimmed.to_owned())
}

/// Letters, digits, CJK unified ideographs, underscore, hyphen.
#[inline]
fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

/// ASCII word character, as used for keyword boundaries.
#[inline]
fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// HTML tag, `javascript:` scheme or `on<name>=` handler attribute.
fn contains_markup(s: &str) -> bool {
    if let Some(open) = s.find('<') {
        if s[open..].contains('>') {
            return true;
        }
    }

    let lower = s.to_ascii_lowercase();
    if lower.contains("javascript:") {
        return true;
    }

    lower.match_indices("on").any(|(at, _)| {
        let rest = &lower[at + 2..];
        let word_len: usize = rest.chars().take_while(|&c| is_word_char(c)).map(char::len_utf8).sum();
        word_len > 0 && rest[word_len..].starts_with('=')
    })
}

/// Any reserved keyword standing as a whole word.
fn contains_reserved_word(s: &str) -> bool {
    s.split(|c: char| !is_word_char(c))
        .filter(|token| !token.is_empty())
        .any(|token| RESERVED_WORDS.iter().any(|word| token.eq_ignore_ascii_case(word)))
}

// =============================================================================
// TIME
// =============================================================================

/// Validates a completion time and rounds it to three decimals.
///
/// Accepts a JSON number or a numeric string.
///
/// # Errors
///
/// Returns [`InvalidField`] when the value is neither number nor string, is
/// an over-long string, is not a finite number, falls outside
/// `[0.1, 9999]` seconds, or carries more than three decimals.
pub fn validate_time(input: &Value) -> FieldResult<f64> {
    let secs = match input {
        Value::Number(n) => n.as_f64().ok_or(InvalidField::new("time is not a number"))?,
        Value::String(s) => {
            if s.len() > MAX_TIME_STRING_LEN {
                return Err(InvalidField::new("input too long"));
            }
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().map_err(|_| InvalidField::new("time is not a number"))?
            }
        }
        _ => return Err(InvalidField::new("time must be a number or a string")),
    };

    if !secs.is_finite() {
        return Err(InvalidField::new("time is not a finite number"));
    }

    if secs < MIN_TIME_SECS {
        return Err(InvalidField::new("time too short"));
    }

    if secs > MAX_TIME_SECS {
        return Err(InvalidField::new("time too long"));
    }

    if decimal_places(secs) > MAX_TIME_DECIMALS {
        return Err(InvalidField::new("time has too many decimals"));
    }

    Ok(round_millis(secs))
}

/// Digits after the decimal point in the shortest round-trip rendering.
fn decimal_places(value: f64) -> usize {
    let rendered = value.to_string();
    rendered.split_once('.').map_or(0, |(_, frac)| frac.len())
}

/// Rounds seconds to whole milliseconds.
#[inline]
#[must_use]
pub fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}

// =============================================================================
// DIFFICULTY
// =============================================================================

/// Validates a difficulty given as JSON.
///
/// # Errors
///
/// Returns [`InvalidField`] when the value is not a string or does not name
/// a tier.
pub fn validate_difficulty(input: &Value) -> FieldResult<Difficulty> {
    match input {
        Value::String(s) => validate_difficulty_name(s),
        _ => Err(InvalidField::new("difficulty must be a string")),
    }
}

/// Validates a difficulty name (route segment or body field).
///
/// Trims and lowercases before the whitelist lookup.
///
/// # Errors
///
/// Returns [`InvalidField`] when the name is empty, over-long or unknown.
pub fn validate_difficulty_name(name: &str) -> FieldResult<Difficulty> {
    if name.is_empty() {
        return Err(InvalidField::new("difficulty cannot be empty"));
    }
    if name.len() > MAX_DIFFICULTY_LEN {
        return Err(InvalidField::new("input too long"));
    }
    let cleaned = name.trim().to_lowercase();
    Difficulty::from_name(&cleaned).ok_or(InvalidField::new("unknown difficulty"))
}

// =============================================================================
// GAME DATA ENVELOPE
// =============================================================================

/// Validates the game-data envelope and lifts it into a typed claim.
///
/// Only the shape is checked here; whether the claim is plausible is the
/// session authenticator's job.
///
/// # Errors
///
/// Returns [`InvalidField`] when the envelope is not an object, is larger
/// than 10 000 bytes serialized, misses one of the ten required fields, or
/// carries a field of the wrong type.
pub fn validate_game_data(input: &Value) -> FieldResult<GameSessionClaim> {
    let Value::Object(fields) = input else {
        return Err(InvalidField::new("game data must be an object"));
    };

    let serialized_len = serde_json::to_string(input).map_or(usize::MAX, |s| s.len());
    if serialized_len > MAX_GAME_DATA_BYTES {
        return Err(InvalidField::new("game data too large"));
    }

    if !REQUIRED_GAME_FIELDS.iter().all(|name| fields.contains_key(*name)) {
        return Err(InvalidField::new("game data incomplete"));
    }

    let game_id = match &fields["gameId"] {
        Value::String(id) if id.len() <= MAX_GAME_ID_LEN => id.clone(),
        _ => return Err(InvalidField::new("game id malformed")),
    };

    let game_state = fields["gameState"]
        .as_str()
        .and_then(GameState::from_name)
        .ok_or(InvalidField::new("game state invalid"))?;

    let time = number_field(fields, "time")?;
    let moves = number_field(fields, "moves")?;
    let mine_count = number_field(fields, "mineCount")?;
    let game_end_time = number_field(fields, "gameEndTime")?;
    let first_click_time = number_field(fields, "firstClickTime")?;

    if moves < 0.0 || moves.fract() != 0.0 || moves > f64::from(u32::MAX) {
        return Err(InvalidField::new("move count must be a non-negative integer"));
    }

    let board_size = match &fields["boardSize"] {
        Value::Object(board) => {
            let width = board.get("width").and_then(Value::as_f64);
            let height = board.get("height").and_then(Value::as_f64);
            match (width, height) {
                (Some(width), Some(height)) => BoardSize { width, height },
                _ => return Err(InvalidField::new("board size malformed")),
            }
        }
        _ => return Err(InvalidField::new("board size invalid")),
    };

    // Range-checked above.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let moves = moves as u32;

    Ok(GameSessionClaim {
        difficulty: fields["difficulty"].as_str().and_then(Difficulty::from_name),
        time,
        moves,
        game_id,
        started_at: parse_instant(&fields["timestamp"]),
        board_size,
        mine_count,
        game_end_time,
        first_click_time,
        game_state,
    })
}

/// A required numeric field. JSON numbers are always finite.
fn number_field(fields: &Map<String, Value>, name: &str) -> FieldResult<f64> {
    fields
        .get(name)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
        .ok_or(InvalidField::new("game data contains an invalid number"))
}

/// RFC 3339 string or epoch milliseconds.
fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => {
            #[allow(clippy::cast_possible_truncation)]
            let millis = n.as_f64().map(|f| f as i64)?;
            DateTime::<Utc>::from_timestamp_millis(millis)
        }
        _ => None,
    }
}
