use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::acquire::{Acquisition, PageSource};
use crate::search::SearchDefinition;

/// Replays canned acquisitions in order, repeating the last one once drained.
pub struct StaticPageSource {
    responses: Mutex<VecDeque<Acquisition>>,
    last: Mutex<Option<Acquisition>>,
    delay: Option<Duration>,
}

impl StaticPageSource {
    pub fn new(responses: Vec<Acquisition>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last: Mutex::new(None),
            delay: None,
        }
    }

    pub fn html(html: &str) -> Self {
        Self::new(vec![Ok(html.to_string())])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl PageSource for StaticPageSource {
    async fn fetch(&self, _definition: &SearchDefinition, _today: NaiveDate) -> Acquisition {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(r) => {
                *last = Some(r.clone());
                r
            }
            None => last.clone().unwrap_or_else(|| Ok(String::new())),
        }
    }
}
