pub const MAX_USERNAME_LEN: usize = 16;
const SUGGESTION_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameError {
    #[error("Username cannot be empty")]
    Empty,
    #[error("Username must be at most {max} characters", max = MAX_USERNAME_LEN)]
    TooLong,
    #[error("Username may only contain letters, digits and '_' (found '{0}')")]
    InvalidCharacter(char),
    #[error("Username '{0}' is already taken")]
    Taken(String),
}

/// Checks the shape of a username. Uniqueness is checked by the caller.
pub fn validate_username(username: &str) -> Result<(), UsernameError> {
    if username.is_empty() {
        return Err(UsernameError::Empty);
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(UsernameError::TooLong);
    }
    if let Some(c) = username
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(UsernameError::InvalidCharacter(c));
    }
    Ok(())
}

/// Proposes free variants of `base` by appending a number.
pub fn suggest_usernames<F>(base: &str, is_taken: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let stem = if cleaned.is_empty() {
        "player".to_string()
    } else {
        cleaned
    };

    let mut suggestions = Vec::with_capacity(SUGGESTION_COUNT);
    for n in 1..1000u32 {
        let suffix = n.to_string();
        let keep = MAX_USERNAME_LEN.saturating_sub(suffix.len());
        let candidate: String = stem.chars().take(keep).chain(suffix.chars()).collect();
        if !is_taken(&candidate) {
            suggestions.push(candidate);
            if suggestions.len() == SUGGESTION_COUNT {
                break;
            }
        }
    }
    suggestions
}
