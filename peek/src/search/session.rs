use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use super::{SearchDriver, SearchOptions, SearchResult, SearchUpdate};
use crate::error::SearchError;
use crate::sink::Sink;

/// Results are flushed to the sink after the first one and then every
/// `FLUSH_EVERY` results.
pub const FLUSH_EVERY: usize = 10;

struct Session {
    query: String,
    options: SearchOptions,
    results: Vec<SearchResult>,
    kill: Option<oneshot::Sender<()>>,
    generation: u64,
}

/// Runs one external search at a time and streams its output to the sink.
pub struct Orchestrator {
    session: Mutex<Session>,
    driver: Arc<dyn SearchDriver>,
    root: PathBuf,
    sink: Sink,
}

impl Orchestrator {
    pub fn new(
        driver: Arc<dyn SearchDriver>,
        root: PathBuf,
        options: SearchOptions,
        sink: Sink,
    ) -> Self {
        Self {
            session: Mutex::new(Session {
                query: String::new(),
                options,
                results: Vec::new(),
                kill: None,
                generation: 0,
            }),
            driver,
            root,
            sink,
        }
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn query(&self) -> String {
        self.session.lock().query.clone()
    }

    pub fn options(&self) -> SearchOptions {
        self.session.lock().options.clone()
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.session.lock().generation
    }

    #[cfg(test)]
    pub fn result_count(&self) -> usize {
        self.session.lock().results.len()
    }

    /// Flips regex matching and returns the new setting.
    pub fn toggle_regex(&self) -> bool {
        let mut session = self.session.lock();
        session.options.use_regex = !session.options.use_regex;
        session.options.use_regex
    }

    /// Flips case-insensitive matching and returns the new setting.
    pub fn toggle_case(&self) -> bool {
        let mut session = self.session.lock();
        session.options.ignore_case = !session.options.ignore_case;
        session.options.ignore_case
    }

    /// Starts a search for `query`, superseding any running one. Returns the
    /// generation of the new session.
    pub fn execute_search(self: &Arc<Self>, query: &str) -> u64 {
        let (generation, options, previous) = {
            let mut session = self.session.lock();
            session.generation += 1;
            session.query = query.to_string();
            session.results.clear();
            self.sink.send(SearchUpdate::Cleared {
                generation: session.generation,
            });
            (
                session.generation,
                session.options.clone(),
                session.kill.take(),
            )
        };

        if let Some(kill) = previous {
            if kill.send(()).is_err() {
                trace!("previous search already exited");
            }
        }

        if !self.driver.is_available() {
            let err = SearchError::Unavailable(self.driver.name().to_string());
            self.fail(generation, err);
            return generation;
        }

        let mut command = match self.driver.build_command(&options, query, &self.root) {
            Ok(command) => command,
            Err(err) => {
                self.fail(generation, err);
                return generation;
            }
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("executing search #{}: {:?}", generation, command.as_std());
        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.fail(generation, SearchError::Spawn(err));
                return generation;
            }
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        {
            let mut session = self.session.lock();
            if session.generation == generation {
                session.kill = Some(kill_tx);
            }
        }
        tokio::spawn(Arc::clone(self).supervise(generation, child, kill_rx));
        generation
    }

    fn fail(&self, generation: u64, err: SearchError) {
        warn!("search #{} failed: {}", generation, err);
        self.publish(generation, vec![SearchResult::error(err.to_string())]);
    }

    /// Appends `results` if `generation` is still the current session.
    fn publish(&self, generation: u64, results: Vec<SearchResult>) -> bool {
        let mut session = self.session.lock();
        if session.generation != generation {
            trace!("dropping {} results from search #{}", results.len(), generation);
            return false;
        }
        session.results.extend(results.iter().cloned());
        self.sink.send(SearchUpdate::Appended {
            generation,
            results,
        })
    }

    async fn supervise(
        self: Arc<Self>,
        generation: u64,
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            let driver = Arc::clone(&self.driver);
            tokio::spawn(forward_lines(stdout, tx.clone(), move |line| {
                driver.parse_line(line)
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone(), |line| {
                (!line.trim().is_empty()).then(|| SearchResult::error(line))
            }));
        }
        drop(tx);
        let consumer = tokio::spawn(Arc::clone(&self).consume(generation, rx));

        let status = tokio::select! {
            _ = kill_rx => {
                debug!("search #{} superseded, killing", generation);
                if let Err(err) = child.kill().await {
                    debug!("failed to kill search #{}: {}", generation, err);
                }
                None
            }
            status = child.wait() => Some(status),
        };

        if let Err(err) = consumer.await {
            warn!("search #{} consumer aborted: {}", generation, err);
        }

        match status {
            Some(Ok(status)) if exited_cleanly(status) => {
                debug!("search #{} finished: {}", generation, status);
            }
            Some(Ok(status)) => {
                let message = format!("Search command failed: {}", status);
                warn!("search #{}: {}", generation, message);
                self.publish(generation, vec![SearchResult::error(message)]);
            }
            Some(Err(err)) => {
                warn!("failed to wait for search #{}: {}", generation, err);
                self.publish(generation, vec![SearchResult::error(err.to_string())]);
            }
            None => {}
        }

        let mut session = self.session.lock();
        if session.generation == generation {
            session.kill = None;
        }
    }

    async fn consume(self: Arc<Self>, generation: u64, mut rx: UnboundedReceiver<SearchResult>) {
        let mut pending = Vec::new();
        let mut count = 0usize;

        while let Some(result) = rx.recv().await {
            pending.push(result);
            count += 1;
            if (count == 1 || count % FLUSH_EVERY == 0)
                && !self.publish(generation, std::mem::take(&mut pending))
            {
                return;
            }
        }

        if !pending.is_empty() && !self.publish(generation, pending) {
            return;
        }
        if count == 0 {
            self.publish(generation, vec![SearchResult::error("No results found")]);
        }
        debug!("search #{} produced {} results", generation, count);
    }
}

/// Exit code 1 is "no match" for both supported tools.
fn exited_cleanly(status: ExitStatus) -> bool {
    status.success() || status.code() == Some(1)
}

/// Reads `stream` line by line and forwards whatever `parse` accepts.
async fn forward_lines<R, F>(stream: R, tx: UnboundedSender<SearchResult>, parse: F)
where
    R: AsyncRead + Unpin,
    F: Fn(&str) -> Option<SearchResult>,
{
    let mut segments = BufReader::new(stream).split(b'\n');
    loop {
        let segment = match segments.next_segment().await {
            Ok(Some(segment)) => segment,
            Ok(None) => break,
            Err(err) => {
                debug!("search output read failed: {}", err);
                break;
            }
        };
        let line = String::from_utf8_lossy(&segment);
        let line = line.trim_end_matches('\r');
        if let Some(result) = parse(line) {
            if tx.send(result).is_err() {
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::search::ResultList;
    use crate::sink::Update;
    use std::path::Path;
    use std::time::Duration;
    use tokio::process::Command;

    /// Runs `sh -c <script>` where the script is chosen from the query.
    struct ShellDriver {
        available: bool,
        script: Box<dyn Fn(&str) -> String + Send + Sync>,
    }

    impl ShellDriver {
        fn new(script: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
            Self {
                available: true,
                script: Box::new(script),
            }
        }
    }

    impl SearchDriver for ShellDriver {
        fn name(&self) -> &str {
            "sh"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn build_command(
            &self,
            _options: &SearchOptions,
            query: &str,
            _root: &Path,
        ) -> Result<Command, SearchError> {
            let mut command = Command::new("sh");
            command.arg("-c").arg((self.script)(query));
            Ok(command)
        }
    }

    fn orchestrator(driver: ShellDriver) -> (Arc<Orchestrator>, UnboundedReceiver<Update>) {
        let (sink, rx) = Sink::channel();
        let orchestrator = Orchestrator::new(
            Arc::new(driver),
            PathBuf::from("/r"),
            SearchOptions::default(),
            sink,
        );
        (Arc::new(orchestrator), rx)
    }

    /// Collects search updates until none arrive for `quiet`.
    async fn settle(rx: &mut UnboundedReceiver<Update>, quiet: Duration) -> Vec<SearchUpdate> {
        let mut updates = Vec::new();
        while let Ok(Some(update)) = tokio::time::timeout(quiet, rx.recv()).await {
            if let Update::Search(update) = update {
                updates.push(update);
            }
        }
        updates
    }

    fn messages(list: &ResultList) -> Vec<String> {
        list.results()
            .iter()
            .map(|result| result.matched_line.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_flushes_first_then_every_ten() {
        let (orchestrator, mut rx) = orchestrator(ShellDriver::new(|_| {
            "i=1; while [ $i -le 25 ]; do echo f.txt:$i:hit; i=$((i+1)); done".to_string()
        }));
        orchestrator.execute_search("hit");

        let updates = settle(&mut rx, Duration::from_millis(500)).await;
        let sizes: Vec<usize> = updates
            .iter()
            .filter_map(|update| match update {
                SearchUpdate::Appended { results, .. } => Some(results.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![1, 9, 10, 5]);
        assert_eq!(orchestrator.result_count(), 25);
    }

    #[tokio::test]
    async fn test_no_match_is_not_an_error() {
        let (orchestrator, mut rx) = orchestrator(ShellDriver::new(|_| "exit 1".to_string()));
        orchestrator.execute_search("missing");

        let mut list = ResultList::default();
        for update in settle(&mut rx, Duration::from_millis(500)).await {
            list.apply(update);
        }
        assert_eq!(messages(&list), vec!["No results found"]);
    }

    #[tokio::test]
    async fn test_stderr_and_exit_status_reported() {
        let (orchestrator, mut rx) =
            orchestrator(ShellDriver::new(|_| "echo boom >&2; exit 2".to_string()));
        orchestrator.execute_search("x");

        let mut list = ResultList::default();
        for update in settle(&mut rx, Duration::from_millis(500)).await {
            list.apply(update);
        }
        let results = list.results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| result.is_error));
        assert_eq!(results[0].matched_line, "boom");
        assert!(results[1].matched_line.starts_with("Search command failed"));
    }

    #[tokio::test]
    async fn test_unavailable_driver() {
        let mut driver = ShellDriver::new(|_| String::new());
        driver.available = false;
        let (orchestrator, mut rx) = orchestrator(driver);
        orchestrator.execute_search("x");

        let mut list = ResultList::default();
        for update in settle(&mut rx, Duration::from_millis(200)).await {
            list.apply(update);
        }
        assert_eq!(
            messages(&list),
            vec!["Search driver 'sh' is not available. Please install it or choose another driver."]
        );
    }

    #[tokio::test]
    async fn test_new_search_kills_previous() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late");
        let slow_marker = marker.clone();
        let (orchestrator, mut rx) = orchestrator(ShellDriver::new(move |query| {
            if query == "slow" {
                format!("echo a.txt:1:first; sleep 1; touch '{}'", slow_marker.display())
            } else {
                "echo b.txt:1:second".to_string()
            }
        }));

        let mut list = ResultList::default();
        let first = orchestrator.execute_search("slow");
        while let Some(update) = rx.recv().await {
            let Update::Search(update) = update else {
                continue;
            };
            let seen = matches!(&update, SearchUpdate::Appended { generation, .. } if *generation == first);
            list.apply(update);
            if seen {
                break;
            }
        }
        assert_eq!(messages(&list), vec!["first"]);

        let second = orchestrator.execute_search("fast");
        for update in settle(&mut rx, Duration::from_millis(1500)).await {
            if let SearchUpdate::Appended { generation, .. } = &update {
                assert_eq!(*generation, second);
            }
            list.apply(update);
        }

        assert_eq!(messages(&list), vec!["second"]);
        assert!(!marker.exists());
    }
}
