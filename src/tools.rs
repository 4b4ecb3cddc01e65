//! Research tools
//!
//! Protein sequence helpers used by the retrieval stage: when a query carries
//! amino-acid sequences, a short validation report is attached to the
//! knowledge context handed to the design agents.

use serde::Serialize;
use std::collections::BTreeMap;

/// The 20 standard amino acids (one-letter codes)
pub const AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWY";

/// Shortest run of amino-acid letters treated as a sequence when scanning free text
pub const MIN_SEQUENCE_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceValidation {
    pub is_valid: bool,
    pub invalid_chars: Vec<char>,
    pub length: usize,
    pub cleaned_sequence: Option<String>,
}

fn is_amino_acid(c: char) -> bool {
    AMINO_ACIDS.contains(c)
}

/// Check every residue against the standard alphabet (case-insensitive, outer whitespace ignored)
pub fn validate_protein_sequence(sequence: &str) -> SequenceValidation {
    let sequence = sequence.trim().to_uppercase();
    let invalid_chars: Vec<char> = sequence.chars().filter(|c| !is_amino_acid(*c)).collect();
    let is_valid = invalid_chars.is_empty();

    SequenceValidation {
        is_valid,
        invalid_chars,
        length: sequence.chars().count(),
        cleaned_sequence: is_valid.then_some(sequence),
    }
}

/// Runs of at least `MIN_SEQUENCE_LEN` amino-acid letters in `text`
pub fn extract_protein_sequences(text: &str) -> Vec<String> {
    let upper = text.to_uppercase();
    let mut sequences = Vec::new();
    let mut current = String::new();

    for c in upper.chars() {
        if is_amino_acid(c) {
            current.push(c);
        } else {
            if current.len() >= MIN_SEQUENCE_LEN {
                sequences.push(current.clone());
            }
            current.clear();
        }
    }
    if current.len() >= MIN_SEQUENCE_LEN {
        sequences.push(current);
    }
    sequences
}

/// Percentage of each standard amino acid in `sequence`
pub fn amino_acid_distribution(sequence: &str) -> BTreeMap<char, f64> {
    let upper = sequence.to_uppercase();
    let total = upper.chars().count();

    AMINO_ACIDS
        .chars()
        .map(|aa| {
            let count = upper.chars().filter(|c| *c == aa).count();
            let pct = if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            };
            (aa, pct)
        })
        .collect()
}

/// Validation report for sequences found in `query`, or None if there are none
pub fn sequence_report(query: &str) -> Option<String> {
    let sequences = extract_protein_sequences(query);
    if sequences.is_empty() {
        return None;
    }

    let mut lines = vec!["序列检查:".to_string()];
    for (i, seq) in sequences.iter().enumerate() {
        let validation = validate_protein_sequence(seq);
        let mut top: Vec<(char, f64)> = amino_acid_distribution(seq).into_iter().collect();
        top.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let composition = top
            .iter()
            .take(3)
            .map(|(aa, pct)| format!("{} {:.1}%", aa, pct))
            .collect::<Vec<_>>()
            .join(", ");

        lines.push(format!(
            "• 序列 {} (长度 {}): {}; 主要氨基酸 {}",
            i + 1,
            validation.length,
            if validation.is_valid { "有效" } else { "包含非法字符" },
            composition
        ));
    }
    Some(lines.join("\n"))
}
