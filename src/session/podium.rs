//! Speed podium: post-lock bonus for the three fastest fully correct
//! answers on an item.

use crate::protocol::PodiumEntry;
use crate::types::{Answer, Player, PlayerId, PodiumConfig};
use std::collections::HashMap;

/// Select up to three 100% answers by ascending `time_spent_ms` and compute
/// their bonuses. Runs exactly once per item, at the LOCKED transition.
/// Ties on time break by player id so the result is deterministic.
pub fn compute_speed_podium(
    answers: &HashMap<PlayerId, Answer>,
    players: &HashMap<PlayerId, Player>,
    base_points: u32,
    config: &PodiumConfig,
) -> Vec<PodiumEntry> {
    if !config.enabled {
        return Vec::new();
    }

    let mut perfect: Vec<&Answer> = answers
        .values()
        .filter(|a| a.score_percentage == 100 && a.is_correct == Some(true))
        .collect();
    perfect.sort_by(|a, b| {
        a.time_spent_ms
            .cmp(&b.time_spent_ms)
            .then_with(|| a.player_id.cmp(&b.player_id))
    });

    let percentages = [config.pct1, config.pct2, config.pct3];
    perfect
        .into_iter()
        .take(3)
        .enumerate()
        .map(|(idx, answer)| {
            let pct = percentages[idx];
            let bonus = (base_points as f64 * pct as f64 / 100.0).round() as i64;
            let name = players
                .get(&answer.player_id)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            PodiumEntry {
                player_id: answer.player_id.clone(),
                player_name: name,
                position: idx + 1,
                bonus_percentage: pct,
                bonus_points: bonus,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(player_id: &str, pct: u8, time_ms: u64) -> (PlayerId, Answer) {
        (
            player_id.to_string(),
            Answer {
                item_id: "item_1".into(),
                player_id: player_id.into(),
                raw: serde_json::Value::Null,
                normalized: String::new(),
                is_correct: Some(pct == 100),
                score_percentage: pct,
                score: pct as i64 / 10,
                time_spent_ms: time_ms,
                is_manually_adjusted: false,
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        )
    }

    fn player(id: &str) -> (PlayerId, Player) {
        (
            id.to_string(),
            Player {
                id: id.into(),
                name: id.to_uppercase(),
                avatar: None,
                device_fingerprint: None,
                score: 0,
                streak: 0,
                online: true,
                joined_at: chrono::Utc::now().to_rfc3339(),
                left_at: None,
            },
        )
    }

    #[test]
    fn test_podium_default_percentages() {
        let answers: HashMap<_, _> = [
            answer("p1", 100, 800),
            answer("p2", 100, 1200),
            answer("p3", 100, 1600),
        ]
        .into_iter()
        .collect();
        let players: HashMap<_, _> = [player("p1"), player("p2"), player("p3")]
            .into_iter()
            .collect();

        let podium =
            compute_speed_podium(&answers, &players, 10, &PodiumConfig::default());
        assert_eq!(podium.len(), 3);
        assert_eq!(podium[0].player_id, "p1");
        assert_eq!(podium[0].position, 1);
        assert_eq!(podium[0].bonus_points, 3); // round(10 * 30%)
        assert_eq!(podium[1].bonus_points, 2);
        assert_eq!(podium[2].bonus_points, 1);
    }

    #[test]
    fn test_podium_only_perfect_answers_qualify() {
        let answers: HashMap<_, _> = [
            answer("p1", 90, 100),
            answer("p2", 100, 5000),
            answer("p3", 0, 50),
        ]
        .into_iter()
        .collect();
        let players: HashMap<_, _> = [player("p1"), player("p2"), player("p3")]
            .into_iter()
            .collect();

        let podium =
            compute_speed_podium(&answers, &players, 10, &PodiumConfig::default());
        assert_eq!(podium.len(), 1);
        assert_eq!(podium[0].player_id, "p2");
    }

    #[test]
    fn test_podium_tie_breaks_by_player_id() {
        let answers: HashMap<_, _> = [answer("p_b", 100, 700), answer("p_a", 100, 700)]
            .into_iter()
            .collect();
        let players: HashMap<_, _> = [player("p_a"), player("p_b")].into_iter().collect();

        let podium =
            compute_speed_podium(&answers, &players, 10, &PodiumConfig::default());
        assert_eq!(podium[0].player_id, "p_a");
        assert_eq!(podium[1].player_id, "p_b");
    }

    #[test]
    fn test_podium_disabled() {
        let answers: HashMap<_, _> = [answer("p1", 100, 100)].into_iter().collect();
        let players: HashMap<_, _> = [player("p1")].into_iter().collect();
        let config = PodiumConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(compute_speed_podium(&answers, &players, 10, &config).is_empty());
    }

    #[test]
    fn test_podium_caps_at_three() {
        let answers: HashMap<_, _> = (0..6)
            .map(|i| answer(&format!("p{}", i), 100, 100 * (i as u64 + 1)))
            .collect();
        let players: HashMap<_, _> = (0..6).map(|i| player(&format!("p{}", i))).collect();
        let podium =
            compute_speed_podium(&answers, &players, 10, &PodiumConfig::default());
        assert_eq!(podium.len(), 3);
        assert!(podium.iter().all(|e| e.position <= 3));
    }
}
