//! Score aggregation views: full board, top-N, and rank lookup.
//!
//! Ranks are dense: tied scores share a rank and the next distinct score
//! gets the following rank. Players who left with answers stay on the
//! board (marked offline); kicked players are gone from the roster and
//! therefore from the board.

use crate::protocol::LeaderboardEntry;
use crate::types::{Player, PlayerId};
use std::collections::HashMap;

/// Full leaderboard, best first. Ties are ordered by name for a stable
/// display.
pub fn leaderboard_entries(players: &HashMap<PlayerId, Player>) -> Vec<LeaderboardEntry> {
    let mut sorted: Vec<&Player> = players.values().collect();
    sorted.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));

    let mut entries = Vec::with_capacity(sorted.len());
    let mut rank = 0;
    let mut last_score: Option<i64> = None;
    for player in sorted {
        if last_score != Some(player.score) {
            rank += 1;
            last_score = Some(player.score);
        }
        entries.push(LeaderboardEntry {
            player_id: player.id.clone(),
            name: player.name.clone(),
            score: player.score,
            rank,
            online: player.online,
            streak: player.streak,
        });
    }
    entries
}

pub fn top_n(players: &HashMap<PlayerId, Player>, n: usize) -> Vec<LeaderboardEntry> {
    let mut entries = leaderboard_entries(players);
    entries.truncate(n);
    entries
}

/// Rank of a single player, if present.
pub fn rank_of(players: &HashMap<PlayerId, Player>, player_id: &PlayerId) -> Option<usize> {
    leaderboard_entries(players)
        .iter()
        .find(|e| &e.player_id == player_id)
        .map(|e| e.rank)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, name: &str, score: i64, online: bool) -> (PlayerId, Player) {
        (
            id.to_string(),
            Player {
                id: id.into(),
                name: name.into(),
                avatar: None,
                device_fingerprint: None,
                score,
                streak: 0,
                online,
                joined_at: chrono::Utc::now().to_rfc3339(),
                left_at: None,
            },
        )
    }

    #[test]
    fn test_dense_ranks_on_ties() {
        let players: HashMap<_, _> = [
            player("p1", "Alice", 30, true),
            player("p2", "Bob", 30, true),
            player("p3", "Carol", 10, true),
            player("p4", "Dave", 5, true),
        ]
        .into_iter()
        .collect();

        let entries = leaderboard_entries(&players);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[1].rank, 1);
        assert_eq!(entries[2].rank, 2);
        assert_eq!(entries[2].name, "Carol");
        assert_eq!(entries[3].rank, 3);
    }

    #[test]
    fn test_offline_players_stay_on_board() {
        let players: HashMap<_, _> = [player("p1", "Alice", 20, false), player("p2", "Bob", 0, true)]
            .into_iter()
            .collect();
        let entries = leaderboard_entries(&players);
        assert_eq!(entries[0].name, "Alice");
        assert!(!entries[0].online);
    }

    #[test]
    fn test_top_n_and_rank_lookup() {
        let players: HashMap<_, _> = [
            player("p1", "Alice", 30, true),
            player("p2", "Bob", 20, true),
            player("p3", "Carol", 10, true),
        ]
        .into_iter()
        .collect();

        assert_eq!(top_n(&players, 2).len(), 2);
        assert_eq!(rank_of(&players, &"p3".to_string()), Some(3));
        assert_eq!(rank_of(&players, &"missing".to_string()), None);
    }
}
