use crate::error::Warning;
use crate::feed::intercept::{CapturePump, CaptureSource, Intercepted, ResponseInterceptor};
use crate::manifest::Manifest;
use crate::results::{Continuation, ResultPage};
use fantoccini::error::CmdError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};

/// Something that can trigger the page's infinite scroll
pub trait Scroller {
    fn scroll_to_bottom(&mut self) -> impl Future<Output = Result<(), CmdError>> + Send;
}

/// Something that can load a feed page and have it captured
pub trait Navigator {
    /// Load `url` as a new document with the capture hook active
    fn open(&mut self, url: &str) -> impl Future<Output = Result<(), CmdError>> + Send;
}

/// Result of waiting for the next feed page
#[derive(Debug)]
pub enum PageWait {
    Page(ResultPage),
    /// The deadline passed without a page
    Idle,
    /// The capture channel closed
    Closed,
}

/// A feed URL that produced its first page, with its capture pump running
pub struct OpenedFeed {
    pub url: String,
    pub first: ResultPage,
    pub events: mpsc::Receiver<Intercepted>,
    pub pump: CapturePump,
}

/// Why pagination ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The feed's continuation marker said there is nothing more
    FeedEnd,
    /// A page arrived with no records
    EmptyPage,
    /// A page arrived but every record was already known
    NoNewRecords,
    /// No page arrived within the wait after a scroll
    Idle,
    /// The scroll cap was reached
    Capped,
    /// The scroll action itself failed
    ScrollFailed,
    /// The capture channel closed
    Disconnected,
    /// No feed URL produced a page
    NoFeed,
}

impl StopReason {
    /// True when the feed was read to its end
    pub fn is_exhausted(&self) -> bool {
        matches!(
            self,
            StopReason::FeedEnd | StopReason::EmptyPage | StopReason::NoNewRecords | StopReason::Idle
        )
    }
}

/// Result of a pagination run
#[derive(Debug)]
pub struct PaginationOutcome {
    pub scrolls: usize,
    pub pages: usize,
    pub stop: StopReason,
    pub warnings: Vec<Warning>,
}

/// Drives infinite scroll until the feed is exhausted.
///
/// The driver is the only writer of the manifest while pages are collected.
pub struct PaginationDriver {
    wait: Duration,
    max_scrolls: usize,
    pages: usize,
    warnings: Vec<Warning>,
}

impl PaginationDriver {
    pub fn new(wait: Duration, max_scrolls: usize) -> Self {
        Self {
            wait,
            max_scrolls,
            pages: 0,
            warnings: Vec::new(),
        }
    }

    /// Merge one page into the manifest.
    ///
    /// Returns the stop reason if this page ends pagination.
    pub fn absorb(&mut self, page: &ResultPage, manifest: &mut Manifest) -> Option<StopReason> {
        self.pages += 1;
        let new = manifest.merge_page(page);
        ::log::info!(
            "Page {}: {} records, {} new ({} total)",
            self.pages,
            page.records.len(),
            new,
            manifest.len()
        );

        if page.records.is_empty() {
            Some(StopReason::EmptyPage)
        } else if page.continuation == Continuation::Done {
            Some(StopReason::FeedEnd)
        } else if new == 0 {
            Some(StopReason::NoNewRecords)
        } else {
            None
        }
    }

    /// Record a warning raised while waiting for pages
    pub fn note(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    /// Wait until `deadline` for the next feed page, recording malformed
    /// responses along the way.
    pub async fn next_page_until(
        &mut self,
        events: &mut mpsc::Receiver<Intercepted>,
        deadline: Instant,
    ) -> PageWait {
        loop {
            match timeout_at(deadline, events.recv()).await {
                Err(_) => return PageWait::Idle,
                Ok(None) => return PageWait::Closed,
                Ok(Some(Intercepted::Page(page))) => return PageWait::Page(page),
                Ok(Some(Intercepted::Malformed(warning))) => self.note(warning),
            }
        }
    }

    /// Open each feed URL in turn until one produces a feed page within
    /// `timeout`.
    ///
    /// A capture pump is started only after its URL has loaded and is shut
    /// down before the next URL is tried, so responses captured on an
    /// earlier document never reach the feed.
    pub async fn open_feed<T>(
        &mut self,
        tab: &mut T,
        feed_urls: &[String],
        interceptor: &ResponseInterceptor,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Option<OpenedFeed>
    where
        T: Navigator + CaptureSource + Clone + Send + 'static,
    {
        for feed_url in feed_urls {
            ::log::info!("Opening feed {}", feed_url);
            if let Err(e) = tab.open(feed_url).await {
                ::log::warn!("Failed to open {}: {}", feed_url, e);
                continue;
            }

            let (mut events, pump) =
                CapturePump::spawn(tab.clone(), interceptor.clone(), poll_interval);
            match self
                .next_page_until(&mut events, Instant::now() + timeout)
                .await
            {
                PageWait::Page(first) => {
                    return Some(OpenedFeed {
                        url: feed_url.clone(),
                        first,
                        events,
                        pump,
                    });
                }
                PageWait::Idle => ::log::warn!(
                    "No feed response from {} within {}s",
                    feed_url,
                    timeout.as_secs()
                ),
                PageWait::Closed => ::log::error!("Capture pump stopped while opening {}", feed_url),
            }
            pump.shutdown().await;
        }
        None
    }

    /// Scroll and absorb pages until an exhaustion signal, the scroll cap, or
    /// a failure ends pagination.
    pub async fn run<S: Scroller>(
        mut self,
        scroller: &mut S,
        events: &mut mpsc::Receiver<Intercepted>,
        manifest: &mut Manifest,
    ) -> PaginationOutcome {
        let mut scrolls = 0;

        let stop = loop {
            if scrolls >= self.max_scrolls {
                break StopReason::Capped;
            }

            if let Err(e) = scroller.scroll_to_bottom().await {
                ::log::warn!("Scroll action failed: {}", e);
                break StopReason::ScrollFailed;
            }
            scrolls += 1;
            ::log::debug!("Scroll {} issued, waiting for the next page", scrolls);

            let deadline = Instant::now() + self.wait;
            let page = match self.next_page_until(events, deadline).await {
                PageWait::Page(page) => page,
                PageWait::Idle => {
                    ::log::info!(
                        "No new page within {:.1}s after scroll {}",
                        self.wait.as_secs_f64(),
                        scrolls
                    );
                    break StopReason::Idle;
                }
                PageWait::Closed => break StopReason::Disconnected,
            };

            if let Some(stop) = self.absorb(&page, manifest) {
                break stop;
            }

            // Pages that arrived together with this one are absorbed before
            // scrolling again, so an end-of-feed signal is never scrolled past.
            if let Some(stop) = self.absorb_queued(events, manifest) {
                break stop;
            }
        };

        self.finish(scrolls, stop)
    }

    /// Absorb the page produced by opening the feed, then scroll for more
    /// unless that page already ended the feed.
    pub async fn run_from<S: Scroller>(
        mut self,
        first: ResultPage,
        scroller: &mut S,
        events: &mut mpsc::Receiver<Intercepted>,
        manifest: &mut Manifest,
    ) -> PaginationOutcome {
        if let Some(stop) = self.absorb(&first, manifest) {
            return self.finish(0, stop);
        }
        if let Some(stop) = self.absorb_queued(events, manifest) {
            return self.finish(0, stop);
        }
        self.run(scroller, events, manifest).await
    }

    /// Outcome for a run where the feed never answered
    pub fn without_feed(self) -> PaginationOutcome {
        self.finish(0, StopReason::NoFeed)
    }

    fn finish(mut self, scrolls: usize, stop: StopReason) -> PaginationOutcome {
        if stop.is_exhausted() {
            ::log::info!("Pagination finished after {} scrolls ({:?})", scrolls, stop);
        } else {
            let warning = Warning::PaginationIncomplete {
                scrolls,
                reason: format!("{:?}", stop),
            };
            ::log::warn!("{}", warning);
            self.warnings.push(warning);
        }

        PaginationOutcome {
            scrolls,
            pages: self.pages,
            stop,
            warnings: self.warnings,
        }
    }

    fn absorb_queued(
        &mut self,
        events: &mut mpsc::Receiver<Intercepted>,
        manifest: &mut Manifest,
    ) -> Option<StopReason> {
        while let Ok(event) = events.try_recv() {
            match event {
                Intercepted::Page(page) => {
                    if let Some(stop) = self.absorb(&page, manifest) {
                        return Some(stop);
                    }
                }
                Intercepted::Malformed(warning) => self.note(warning),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::intercept::CapturedResponse;
    use crate::filter::FeedFilter;
    use crate::results::ImageRecord;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    fn records(range: std::ops::Range<usize>) -> Vec<ImageRecord> {
        range
            .map(|i| {
                let value = json!({"response_id": format!("r{}", i), "prompt": format!("prompt {}", i)});
                ImageRecord::from_fields(value.as_object().unwrap().clone()).unwrap()
            })
            .collect()
    }

    fn page(records: Vec<ImageRecord>, continuation: Continuation) -> Intercepted {
        Intercepted::Page(ResultPage::new(
            "https://site/api/feed".to_string(),
            records,
            continuation,
        ))
    }

    /// Each scroll releases the next scripted batch of events into the channel
    struct FeedScroller {
        tx: mpsc::Sender<Intercepted>,
        script: VecDeque<Vec<Intercepted>>,
        scrolls: usize,
    }

    impl FeedScroller {
        fn new(tx: mpsc::Sender<Intercepted>, script: Vec<Vec<Intercepted>>) -> Self {
            Self {
                tx,
                script: script.into(),
                scrolls: 0,
            }
        }
    }

    impl Scroller for FeedScroller {
        async fn scroll_to_bottom(&mut self) -> Result<(), CmdError> {
            self.scrolls += 1;
            if let Some(batch) = self.script.pop_front() {
                for event in batch {
                    self.tx.send(event).await.unwrap();
                }
            }
            Ok(())
        }
    }

    fn driver() -> PaginationDriver {
        PaginationDriver::new(Duration::from_millis(50), 20)
    }

    #[tokio::test]
    async fn test_two_pages_then_empty_page() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scroller = FeedScroller::new(
            tx,
            vec![
                vec![page(records(0..50), Continuation::Unknown)],
                vec![page(records(50..100), Continuation::Unknown)],
                vec![page(vec![], Continuation::Unknown)],
            ],
        );
        let mut manifest = Manifest::new();

        let outcome = driver().run(&mut scroller, &mut rx, &mut manifest).await;

        assert_eq!(manifest.len(), 100);
        assert_eq!(outcome.stop, StopReason::EmptyPage);
        assert_eq!(outcome.scrolls, 3);
        assert_eq!(outcome.pages, 3);
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_across_pages_keep_first_occurrence() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut second = records(5..15);
        let overlap = json!({"response_id": "r5", "prompt": "rewritten"});
        second[0] = ImageRecord::from_fields(overlap.as_object().unwrap().clone()).unwrap();

        let mut scroller = FeedScroller::new(
            tx,
            vec![
                vec![page(records(0..10), Continuation::More)],
                vec![page(second, Continuation::More)],
                vec![page(vec![], Continuation::Done)],
            ],
        );
        let mut manifest = Manifest::new();
        driver().run(&mut scroller, &mut rx, &mut manifest).await;

        assert_eq!(manifest.len(), 15);
        let r5: Vec<_> = manifest.iter().filter(|r| r.id() == "r5").collect();
        assert_eq!(r5.len(), 1);
        assert_eq!(r5[0].prompt(), Some("prompt 5"));
    }

    #[tokio::test]
    async fn test_no_scroll_after_done_marker() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scroller = FeedScroller::new(
            tx,
            vec![
                vec![page(records(0..5), Continuation::More)],
                vec![page(records(5..10), Continuation::Done)],
                vec![page(records(10..15), Continuation::More)],
            ],
        );
        let mut manifest = Manifest::new();
        let outcome = driver().run(&mut scroller, &mut rx, &mut manifest).await;

        assert_eq!(outcome.stop, StopReason::FeedEnd);
        assert_eq!(scroller.scrolls, 2);
        assert_eq!(manifest.len(), 10);
    }

    #[tokio::test]
    async fn test_queued_done_page_is_not_scrolled_past() {
        let (tx, mut rx) = mpsc::channel(16);
        // One scroll delivers two pages at once, the second ending the feed
        let mut scroller = FeedScroller::new(
            tx,
            vec![
                vec![
                    page(records(0..5), Continuation::More),
                    page(records(5..8), Continuation::Done),
                ],
                vec![page(records(8..12), Continuation::More)],
            ],
        );
        let mut manifest = Manifest::new();
        let outcome = driver().run(&mut scroller, &mut rx, &mut manifest).await;

        assert_eq!(outcome.stop, StopReason::FeedEnd);
        assert_eq!(scroller.scrolls, 1);
        assert_eq!(manifest.len(), 8);
    }

    #[tokio::test]
    async fn test_malformed_response_does_not_halt_pagination() {
        let (tx, mut rx) = mpsc::channel(16);
        let malformed = Intercepted::Malformed(Warning::MalformedResponse {
            url: "https://site/api/feed".to_string(),
            reason: "EOF while parsing".to_string(),
        });
        let mut scroller = FeedScroller::new(
            tx,
            vec![
                vec![page(records(0..3), Continuation::More)],
                vec![malformed, page(records(3..6), Continuation::More)],
                vec![page(vec![], Continuation::Done)],
            ],
        );
        let mut manifest = Manifest::new();
        let outcome = driver().run(&mut scroller, &mut rx, &mut manifest).await;

        assert_eq!(manifest.len(), 6);
        assert_eq!(outcome.stop, StopReason::EmptyPage);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(matches!(outcome.warnings[0], Warning::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_pagination() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scroller =
            FeedScroller::new(tx, vec![vec![page(records(0..4), Continuation::Unknown)]]);
        let mut manifest = Manifest::new();
        let outcome = driver().run(&mut scroller, &mut rx, &mut manifest).await;

        assert_eq!(outcome.stop, StopReason::Idle);
        assert!(outcome.stop.is_exhausted());
        assert_eq!(outcome.scrolls, 2);
        assert_eq!(manifest.len(), 4);
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_page_without_new_records_ends_pagination() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scroller = FeedScroller::new(
            tx,
            vec![
                vec![page(records(0..4), Continuation::More)],
                vec![page(records(0..4), Continuation::More)],
                vec![page(records(4..8), Continuation::More)],
            ],
        );
        let mut manifest = Manifest::new();
        let outcome = driver().run(&mut scroller, &mut rx, &mut manifest).await;

        assert_eq!(outcome.stop, StopReason::NoNewRecords);
        assert_eq!(scroller.scrolls, 2);
        assert_eq!(manifest.len(), 4);
    }

    #[tokio::test]
    async fn test_scroll_cap_reports_incomplete() {
        let (tx, mut rx) = mpsc::channel(16);
        let script = (0..10)
            .map(|i| vec![page(records(i * 2..i * 2 + 2), Continuation::More)])
            .collect();
        let mut scroller = FeedScroller::new(tx, script);
        let mut manifest = Manifest::new();
        let outcome = PaginationDriver::new(Duration::from_millis(50), 3)
            .run(&mut scroller, &mut rx, &mut manifest)
            .await;

        assert_eq!(outcome.stop, StopReason::Capped);
        assert!(!outcome.stop.is_exhausted());
        assert_eq!(scroller.scrolls, 3);
        assert_eq!(manifest.len(), 6);
        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::PaginationIncomplete { scrolls: 3, .. }]
        ));
    }

    #[tokio::test]
    async fn test_first_page_is_absorbed_before_scrolling() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scroller = FeedScroller::new(
            tx,
            vec![
                vec![page(records(3..6), Continuation::More)],
                vec![page(vec![], Continuation::Unknown)],
            ],
        );
        let first = ResultPage::new("u".into(), records(0..3), Continuation::More);
        let mut manifest = Manifest::new();
        let outcome = driver()
            .run_from(first, &mut scroller, &mut rx, &mut manifest)
            .await;

        assert_eq!(manifest.iter().next().unwrap().id(), "r0");
        assert_eq!(manifest.len(), 6);
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.scrolls, 2);
    }

    #[tokio::test]
    async fn test_single_page_feed_never_scrolls() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut scroller = FeedScroller::new(tx, vec![vec![page(records(9..12), Continuation::More)]]);
        let first = ResultPage::new("u".into(), records(0..9), Continuation::Done);
        let mut manifest = Manifest::new();
        let outcome = driver()
            .run_from(first, &mut scroller, &mut rx, &mut manifest)
            .await;

        assert_eq!(outcome.stop, StopReason::FeedEnd);
        assert_eq!(scroller.scrolls, 0);
        assert_eq!(manifest.len(), 9);
    }

    #[test]
    fn test_missing_feed_is_incomplete() {
        let outcome = driver().without_feed();
        assert_eq!(outcome.stop, StopReason::NoFeed);
        assert!(!outcome.stop.is_exhausted());
        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::PaginationIncomplete { scrolls: 0, .. }]
        ));
    }

    #[tokio::test]
    async fn test_wait_reports_idle_and_closed() {
        let mut driver = driver();
        let (tx, mut rx) = mpsc::channel(4);

        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(matches!(driver.next_page_until(&mut rx, deadline).await, PageWait::Idle));

        drop(tx);
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(matches!(driver.next_page_until(&mut rx, deadline).await, PageWait::Closed));
    }

    #[test]
    fn test_absorb_signals() {
        let mut driver = driver();
        let mut manifest = Manifest::new();

        let first = ResultPage::new("u".into(), records(0..2), Continuation::More);
        assert_eq!(driver.absorb(&first, &mut manifest), None);

        let done = ResultPage::new("u".into(), records(2..3), Continuation::Done);
        assert_eq!(driver.absorb(&done, &mut manifest), Some(StopReason::FeedEnd));
        assert_eq!(manifest.len(), 3);
    }

    /// A tab whose capture buffer belongs to the current document: opening a
    /// URL replaces it with what that document's own requests produce.
    #[derive(Clone, Default)]
    struct FakeTab {
        buffer: Arc<Mutex<Vec<CapturedResponse>>>,
        documents: Arc<HashMap<String, Vec<CapturedResponse>>>,
        opened: Arc<Mutex<Vec<String>>>,
    }

    impl Navigator for FakeTab {
        async fn open(&mut self, url: &str) -> Result<(), CmdError> {
            self.opened.lock().unwrap().push(url.to_string());
            let responses = self.documents.get(url).cloned().unwrap_or_default();
            *self.buffer.lock().unwrap() = responses;
            Ok(())
        }
    }

    impl CaptureSource for FakeTab {
        async fn drain(&mut self) -> Result<Vec<CapturedResponse>, CmdError> {
            Ok(std::mem::take(&mut *self.buffer.lock().unwrap()))
        }
    }

    fn feed_response(url: &str, ids: std::ops::Range<usize>) -> CapturedResponse {
        let results: Vec<_> = ids
            .map(|i| json!({"response_id": format!("r{}", i), "prompt": "p"}))
            .collect();
        CapturedResponse {
            url: url.to_string(),
            status: 200,
            content_type: "application/json".to_string(),
            body: Some(json!({ "results": results, "next_cursor": "n" }).to_string()),
        }
    }

    const MY_IMAGES: &str = "https://ideogram.ai/my-images";
    const ASSETS: &str = "https://ideogram.ai/assets";

    async fn open(tab: &mut FakeTab, urls: &[&str]) -> Option<OpenedFeed> {
        let urls: Vec<String> = urls.iter().map(|u| u.to_string()).collect();
        let interceptor = ResponseInterceptor::new(FeedFilter::default());
        driver()
            .open_feed(
                tab,
                &urls,
                &interceptor,
                Duration::from_millis(5),
                Duration::from_millis(100),
            )
            .await
    }

    #[tokio::test]
    async fn test_earlier_document_responses_never_become_the_first_page() {
        // The landing page left an explore-feed response in the buffer
        let mut tab = FakeTab {
            buffer: Arc::new(Mutex::new(vec![feed_response(
                "https://ideogram.ai/api/explore",
                100..110,
            )])),
            documents: Arc::new(HashMap::from([(
                MY_IMAGES.to_string(),
                vec![feed_response("https://ideogram.ai/api/u/me/creations", 0..3)],
            )])),
            ..FakeTab::default()
        };

        let opened = open(&mut tab, &[MY_IMAGES]).await.unwrap();
        assert_eq!(opened.url, MY_IMAGES);
        assert_eq!(opened.first.source_url, "https://ideogram.ai/api/u/me/creations");
        let ids: Vec<&str> = opened.first.records.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2"]);
        opened.pump.shutdown().await;
    }

    #[tokio::test]
    async fn test_falls_back_to_next_feed_url() {
        let mut tab = FakeTab {
            documents: Arc::new(HashMap::from([(
                ASSETS.to_string(),
                vec![feed_response("https://ideogram.ai/api/assets", 0..2)],
            )])),
            ..FakeTab::default()
        };

        let opened = open(&mut tab, &[MY_IMAGES, ASSETS]).await.unwrap();
        assert_eq!(opened.url, ASSETS);
        assert_eq!(opened.first.records.len(), 2);
        assert_eq!(*tab.opened.lock().unwrap(), vec![MY_IMAGES.to_string(), ASSETS.to_string()]);
        opened.pump.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_feed_url_answers() {
        let mut tab = FakeTab::default();
        assert!(open(&mut tab, &[MY_IMAGES, ASSETS]).await.is_none());
        assert_eq!(tab.opened.lock().unwrap().len(), 2);
    }
}
