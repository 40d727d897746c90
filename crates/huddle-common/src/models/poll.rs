use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    #[serde(default)]
    pub votes: u32,
}

/// A room poll. Ids are chosen by the creating client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub creator: Option<Uuid>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Poll {
    pub fn new(id: impl Into<String>, question: impl Into<String>, options: &[&str]) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            options: options
                .iter()
                .map(|text| PollOption {
                    text: (*text).to_owned(),
                    votes: 0,
                })
                .collect(),
            creator: None,
            active: true,
        }
    }

    /// Count one vote. Returns false for closed polls and unknown options.
    pub fn record_vote(&mut self, option: usize) -> bool {
        if !self.active {
            return false;
        }
        match self.options.get_mut(option) {
            Some(opt) => {
                opt.votes = opt.votes.saturating_add(1);
                true
            }
            None => false,
        }
    }

    pub fn total_votes(&self) -> u32 {
        self.options.iter().map(|o| o.votes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn votes_only_count_on_open_polls() {
        let mut poll = Poll::new("p1", "Lunch?", &["pizza", "sushi"]);
        assert!(poll.record_vote(1));
        assert!(!poll.record_vote(7));
        poll.active = false;
        assert!(!poll.record_vote(0));
        assert_eq!(poll.total_votes(), 1);
        assert_eq!(poll.options[1].votes, 1);
    }
}
