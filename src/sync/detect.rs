use crate::model::StatusSnapshot;

/// Decide whether `next` is a genuinely new status.
///
/// The polling channel can receive byte-identical payloads on every tick;
/// treating those as "no update" is what keeps the staleness clock honest.
/// The canonical comparison set covers the fields that move on every real
/// game event: both elapsed times, the move index, the player on move, the
/// move timestamp and (when the server sends one) the fine-grained payload
/// timestamp.
pub fn changed(prev: Option<&StatusSnapshot>, next: &StatusSnapshot) -> bool {
    let Some(prev) = prev else {
        return true;
    };
    prev.time1 != next.time1
        || prev.time2 != next.time2
        || prev.move_index != next.move_index
        || prev.onmove != next.onmove
        || prev.move_time != next.move_time
        || prev.timestamp != next.timestamp
}
