use tracing::debug;

use crate::models::{IntentCatalog, IntentSelection, ScoreMap};

pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Counts, for every catalog intent, how many of its keywords occur as a
/// case-insensitive substring of the query. A keyword counts once no matter how
/// often it repeats.
pub fn score_intents(query: &str, catalog: &IntentCatalog) -> ScoreMap {
    let text = query.to_lowercase();
    let mut scores = ScoreMap::new();

    for intent in &catalog.intents {
        let score = intent
            .keywords
            .iter()
            .filter(|keyword| text.contains(&keyword.to_lowercase()))
            .count();
        scores.insert(intent.id.clone(), score as u32);
    }

    scores
}

/// Picks the highest-scoring intent. Ties keep the entry seen first, and the
/// fold is seeded with the catalog default so an empty or all-zero map still
/// yields a selection.
pub fn select_intent(query: &str, scores: &ScoreMap, catalog: &IntentCatalog) -> IntentSelection {
    let (best_intent, best_score) = scores.iter().fold(
        (catalog.default_intent.as_str(), 0_u32),
        |best, (intent_id, score)| {
            if score > best.1 {
                (intent_id, score)
            } else {
                best
            }
        },
    );

    let total = scores.total().max(1);
    let confidence = f64::from(best_score) / f64::from(total);
    let threshold = catalog.oos_threshold();
    let is_out_of_scope = confidence < threshold;

    let rationale = if is_out_of_scope {
        format!("Confidence {confidence:.2} below threshold {threshold}")
    } else {
        format!("Matched intent {best_intent} with score {best_score}")
    };

    IntentSelection {
        query: query.to_string(),
        intent_id: best_intent.to_string(),
        confidence,
        best_score,
        is_out_of_scope,
        rationale,
        scores: scores.clone(),
    }
}

pub fn classify(query: &str, catalog: &IntentCatalog) -> IntentSelection {
    let scores = score_intents(query, catalog);
    let selection = select_intent(query, &scores, catalog);
    debug!(
        intent = %selection.intent_id,
        confidence = selection.confidence,
        out_of_scope = selection.is_out_of_scope,
        "query classified"
    );
    selection
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather_catalog() -> IntentCatalog {
        IntentCatalog::new("general")
            .with_intent("weather", ["weather", "forecast"])
            .with_intent("general", Vec::<String>::new())
            .with_threshold(0.15)
    }

    fn bus_catalog() -> IntentCatalog {
        IntentCatalog::new("generalInfo")
            .with_intent("countQuery", ["how many", "count", "number of"])
            .with_intent("extremeValue", ["maximum", "highest", "max", "peak"])
            .with_intent("location", ["latitude", "longitude", "location"])
    }

    #[test]
    fn weather_query_matches_single_intent() {
        let result = classify("what is the weather", &weather_catalog());
        assert_eq!(result.scores.get("weather"), Some(1));
        assert_eq!(result.scores.get("general"), Some(0));
        assert_eq!(result.intent_id, "weather");
        assert_eq!(result.confidence, 1.0);
        assert!(!result.is_out_of_scope);
        assert_eq!(result.rationale, "Matched intent weather with score 1");
    }

    #[test]
    fn gibberish_falls_back_to_default_and_is_oos() {
        let result = classify("asdf qwer", &weather_catalog());
        assert_eq!(result.intent_id, "general");
        assert_eq!(result.best_score, 0);
        assert_eq!(result.confidence, 0.0);
        assert!(result.is_out_of_scope);
        assert_eq!(result.rationale, "Confidence 0.00 below threshold 0.15");
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let scores = score_intents("Any FORECASTS for today?", &weather_catalog());
        assert_eq!(scores.get("weather"), Some(1));
    }

    #[test]
    fn repeated_keyword_counts_once() {
        let scores = score_intents("weather weather weather", &weather_catalog());
        assert_eq!(scores.get("weather"), Some(1));
    }

    #[test]
    fn every_intent_gets_a_bounded_entry() {
        let catalog = bus_catalog();
        let scores = score_intents(
            "How many rows count the maximum latitude and longitude location?",
            &catalog,
        );
        assert_eq!(scores.len(), catalog.intents.len());
        for intent in &catalog.intents {
            let score = scores.get(&intent.id).unwrap();
            assert!(score as usize <= intent.keywords.len());
        }
        assert_eq!(scores.get("location"), Some(3));
    }

    #[test]
    fn ties_keep_catalog_order() {
        let catalog = bus_catalog();
        let result = classify("count the peak", &catalog);
        assert_eq!(result.scores.get("countQuery"), Some(1));
        assert_eq!(result.scores.get("extremeValue"), Some(1));
        assert_eq!(result.intent_id, "countQuery");
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn empty_query_selects_default_with_zero_confidence() {
        let result = classify("", &bus_catalog());
        assert_eq!(result.intent_id, "generalInfo");
        assert_eq!(result.confidence, 0.0);
        assert!(result.is_out_of_scope);
    }

    #[test]
    fn empty_catalog_still_produces_a_selection() {
        let catalog = IntentCatalog::new("fallbackIntent");
        let result = classify("anything at all", &catalog);
        assert!(result.scores.is_empty());
        assert_eq!(result.intent_id, "fallbackIntent");
        assert_eq!(result.best_score, 0);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn zero_threshold_never_marks_oos() {
        let catalog = bus_catalog().with_threshold(0.0);
        let result = classify("", &catalog);
        assert!(!result.is_out_of_scope);
    }

    #[test]
    fn confidence_stays_within_unit_interval() {
        let catalog = bus_catalog();
        for query in [
            "",
            "count",
            "how many peak latitude",
            "maximum max highest peak location",
        ] {
            let result = classify(query, &catalog);
            assert!((0.0..=1.0).contains(&result.confidence));
            assert_eq!(result.confidence == 0.0, result.scores.total() == 0);
        }
    }

    #[test]
    fn low_share_of_matches_is_out_of_scope() {
        let catalog = IntentCatalog::new("general")
            .with_intent("a", ["a1"])
            .with_intent("b", ["b1"])
            .with_intent("c", ["c1"])
            .with_threshold(0.5);
        let result = classify("a1 b1 c1", &catalog);
        assert_eq!(result.intent_id, "a");
        assert!(result.is_out_of_scope);
        assert_eq!(result.rationale, "Confidence 0.33 below threshold 0.5");
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_text("  how   many\trows \n"), "how many rows");
    }
}
