use docfill_shared::Answers;

/// Rewrites one paragraph's text given the user's answers.
pub trait SubstitutionStrategy: Send + Sync {
    fn apply_to(&self, paragraph: &str, answers: &Answers) -> String;
}

/// Plain text substitution keyed on variable names.
///
/// For each answer in order, every verbatim occurrence of the name is
/// replaced, then every `[name]`. The two passes are independent, so a
/// bracketed placeholder is usually consumed by the first pass and its
/// brackets survive (`[Date]` becomes `[2024-01-01]`). Names that never
/// appear in the text are silently ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestEffortSubstitution;

impl SubstitutionStrategy for BestEffortSubstitution {
    fn apply_to(&self, paragraph: &str, answers: &Answers) -> String {
        let mut text = paragraph.to_string();
        for (name, value) in answers.iter() {
            if name.is_empty() {
                continue;
            }
            if text.contains(name) {
                text = text.replace(name, value);
            }
            let bracketed = format!("[{name}]");
            if text.contains(&bracketed) {
                text = text.replace(&bracketed, value);
            }
        }
        text
    }
}
