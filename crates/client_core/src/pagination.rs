use shared::domain::EventId;

/// Per-conversation back-pagination bookkeeping. At most one request is
/// outstanding; once the start of the conversation is reached no further
/// requests are issued.
#[derive(Debug, Clone, Default)]
pub struct PaginationController {
    outstanding: bool,
    reached_start: bool,
    next_token: Option<String>,
}

/// A granted request for one page of older history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub from: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationOutcome {
    /// Dropped: a request was already outstanding or the start was reached.
    Skipped,
    Loaded {
        pages: usize,
        has_more: bool,
        anchor: Option<EventId>,
    },
    /// The first fetch failed; the slot is released and the start is not
    /// marked.
    Failed,
}

impl PaginationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) -> Option<PageRequest> {
        if self.outstanding || self.reached_start {
            return None;
        }
        self.outstanding = true;
        Some(PageRequest {
            from: self.next_token.clone(),
        })
    }

    /// Records a finished page. Returns whether more history exists.
    pub fn complete(&mut self, next_token: Option<String>) -> bool {
        self.outstanding = false;
        match next_token {
            Some(token) => {
                self.next_token = Some(token);
                true
            }
            None => {
                self.reached_start = true;
                self.next_token = None;
                false
            }
        }
    }

    pub fn fail(&mut self) {
        self.outstanding = false;
    }

    pub fn reached_start(&self) -> bool {
        self.reached_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_concurrent_requests() {
        let mut controller = PaginationController::new();
        assert_eq!(controller.begin(), Some(PageRequest { from: None }));
        assert_eq!(controller.begin(), None);
        assert!(controller.complete(Some("t1".into())));
        assert_eq!(
            controller.begin(),
            Some(PageRequest {
                from: Some("t1".into())
            })
        );
    }

    #[test]
    fn stops_after_start_is_reached() {
        let mut controller = PaginationController::new();
        controller.begin();
        assert!(!controller.complete(None));
        assert!(controller.reached_start());
        assert_eq!(controller.begin(), None);
    }

    #[test]
    fn failure_releases_the_slot_without_reaching_start() {
        let mut controller = PaginationController::new();
        controller.begin();
        controller.fail();
        assert!(!controller.reached_start());
        assert!(controller.begin().is_some());
    }
}
