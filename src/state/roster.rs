use std::collections::HashSet;

use uuid::Uuid;

use crate::dao::models::PlayerEntity;

/// Pick the display name for a joining player.
///
/// When `requested` collides case-insensitively with a name in `taken`, the smallest
/// integer suffix starting at 2 that makes it unique is appended. The base is shortened
/// so the suffixed name stays within `max_chars`.
pub fn resolve_display_name<'a>(
    requested: &str,
    taken: impl IntoIterator<Item = &'a str>,
    max_chars: usize,
) -> String {
    let base = requested.trim();
    let taken: HashSet<String> = taken.into_iter().map(str::to_lowercase).collect();

    if !taken.contains(&base.to_lowercase()) {
        return base.to_string();
    }

    (2u32..)
        .map(|suffix| {
            let suffix = suffix.to_string();
            let room = max_chars.saturating_sub(suffix.len());
            let head: String = base.chars().take(room).collect();
            format!("{}{suffix}", head.trim_end())
        })
        .find(|candidate| !taken.contains(&candidate.to_lowercase()))
        .unwrap_or_else(|| base.to_string())
}

/// Players visible in rosters and leaderboards.
pub fn active_players(players: impl IntoIterator<Item = PlayerEntity>) -> Vec<PlayerEntity> {
    players.into_iter().filter(|player| !player.removed).collect()
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    /// 1-based rank; tied scores share a rank.
    pub rank: u32,
    /// Player identifier.
    pub player_id: Uuid,
    /// Display name.
    pub name: String,
    /// Avatar color.
    pub color: String,
    /// Cumulative score.
    pub score: i64,
}

/// Rank non-removed players by score, breaking ties on join time for display order.
pub fn leaderboard(players: impl IntoIterator<Item = PlayerEntity>) -> Vec<Standing> {
    let mut players = active_players(players);
    players.sort_by(|a, b| b.score.cmp(&a.score).then(a.joined_at.cmp(&b.joined_at)));

    let mut standings = Vec::with_capacity(players.len());
    let mut previous: Option<(i64, u32)> = None;
    for (position, player) in players.into_iter().enumerate() {
        let rank = match previous {
            Some((score, rank)) if score == player.score => rank,
            _ => position as u32 + 1,
        };
        previous = Some((player.score, rank));
        standings.push(Standing {
            rank,
            player_id: player.id,
            name: player.name,
            color: player.color,
            score: player.score,
        });
    }
    standings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    const MAX: usize = 24;

    fn player(name: &str, score: i64, joined_offset: u64, removed: bool) -> PlayerEntity {
        PlayerEntity {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            name: name.into(),
            color: "#ffffff".into(),
            score,
            removed,
            joined_at: SystemTime::UNIX_EPOCH + Duration::from_secs(joined_offset),
            token: String::new(),
            version: 1,
        }
    }

    #[test]
    fn free_name_is_kept() {
        assert_eq!(resolve_display_name("Alex", ["Sam"], MAX), "Alex");
    }

    #[test]
    fn collision_picks_smallest_free_suffix() {
        assert_eq!(resolve_display_name("Alex", ["Alex"], MAX), "Alex2");
        assert_eq!(resolve_display_name("Alex", ["alex", "ALEX2"], MAX), "Alex3");
        assert_eq!(resolve_display_name("Alex", ["Alex", "Alex3"], MAX), "Alex2");
    }

    #[test]
    fn suffixed_name_fits_the_length_limit() {
        let long = "Alexandria-Longname-Quiz";
        assert_eq!(long.chars().count(), MAX);
        let resolved = resolve_display_name(long, [long], MAX);
        assert_eq!(resolved, "Alexandria-Longname-Qui2");
        assert_eq!(resolved.chars().count(), MAX);

        let taken = ["Alexandria-Longname-Quiz", "Alexandria-Longname-Qui2"];
        assert_eq!(resolve_display_name(long, taken, MAX), "Alexandria-Longname-Qui3");
    }

    #[test]
    fn requested_name_is_trimmed() {
        assert_eq!(resolve_display_name("  Alex ", ["alex"], MAX), "Alex2");
    }

    #[test]
    fn leaderboard_orders_by_score_then_join_time() {
        let standings = leaderboard(vec![
            player("late", 1500, 30, false),
            player("early", 1500, 10, false),
            player("top", 2500, 20, false),
            player("gone", 9000, 0, true),
            player("last", 0, 5, false),
        ]);

        let names: Vec<_> = standings.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["top", "early", "late", "last"]);
        let ranks: Vec<_> = standings.iter().map(|s| s.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4]);
    }
}
