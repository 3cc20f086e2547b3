use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::Parser;
use scraper::Html;
use url::Url;

use startup_registry_crawler::extract::FieldExtractor;
use startup_registry_crawler::fetch::{save_snapshot, FetchConfig, Fetcher, DEFAULT_USER_AGENT};
use startup_registry_crawler::frontier::Frontier;
use startup_registry_crawler::listing::{extract_detail_links, find_next_page};
use startup_registry_crawler::record::RecordSink;
use startup_registry_crawler::search::{discover_search_form, FormMethod, FALLBACK_SEARCH_URLS};
use startup_registry_crawler::ScraperError;

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "startup-registry-crawler")]
#[command(about = "Scrapes the Italian startup registry into a CSV file", long_about = None)]
struct Args {
    /// Registry homepage to start from
    #[arg(long, default_value = "https://startup.registroimprese.it/isin/home")]
    start_url: String,

    /// Output CSV path
    #[arg(short, long, default_value = "italian_startups.csv")]
    output: PathBuf,

    /// Stop after this many records (0 = no limit)
    #[arg(short, long, default_value = "0")]
    limit: usize,

    /// Hard ceiling on listing pages followed
    #[arg(long, default_value = "20")]
    max_pages: usize,

    /// Minimum pre-request delay in milliseconds
    #[arg(long, default_value = "1000")]
    delay_min: u64,

    /// Maximum pre-request delay in milliseconds
    #[arg(long, default_value = "3000")]
    delay_max: u64,

    /// Request timeout in seconds
    #[arg(short, long, default_value = "30")]
    timeout: u64,

    /// Attempts per URL before giving up
    #[arg(long, default_value = "3")]
    retries: u32,

    /// Custom user agent
    #[arg(short, long)]
    user_agent: Option<String>,

    /// Directory for downloaded company documents
    #[arg(long, default_value = "downloads")]
    downloads_dir: PathBuf,

    /// Skip downloading attached documents
    #[arg(long)]
    skip_files: bool,

    /// Save raw page snapshots for offline inspection
    #[arg(long)]
    debug: bool,

    /// Directory for page snapshots
    #[arg(long, default_value = "debug")]
    debug_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let start = Url::parse(&args.start_url)
        .map_err(|e| ScraperError::InvalidUrl(format!("{}: {}", args.start_url, e)))?;

    let mut fetcher = Fetcher::new(FetchConfig {
        user_agent: args
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        timeout: args.timeout,
        retries: args.retries,
        delay_ms: (args.delay_min, args.delay_max),
    })?;
    fetcher.load_robots(&start).await;
    fetcher.set_referer(start.as_str());

    log::info!("🕷️  Starting crawl from: {}", start);
    let started = Instant::now();

    // The homepage is the one fetch that may end the run.
    let homepage = fetcher
        .get(start.as_str())
        .await
        .map_err(|e| anyhow::anyhow!("could not reach {}: {}", start, e))?;
    snapshot(&args, "homepage", &homepage);

    let mut sink = RecordSink::create(&args.output)?;
    let extractor = FieldExtractor::new();
    let mut frontier = Frontier::new();

    let mut listing = first_listing(&fetcher, &homepage, &start).await;
    if listing.is_none() {
        anyhow::bail!("could not obtain a search results page");
    }

    // Listing pages get their own seen set so a "next" control cycling back
    // to an earlier page ends pagination instead of looping to the ceiling.
    let mut visited_listings = Frontier::new();
    if let Some((_, url)) = &listing {
        visited_listings.mark_seen(url.as_str());
    }

    let mut pages = 0usize;
    let mut records = 0usize;

    'pages: while let Some((html, page_url)) = listing.take() {
        pages += 1;
        snapshot(&args, "listing", &html);

        let doc = Html::parse_document(&html);
        let links = extract_detail_links(&doc, &page_url);
        log::info!("Page {}: {} detail link(s)", pages, links.len());
        for link in links {
            frontier.enqueue(link);
        }

        while let Some(link) = frontier.next() {
            if args.limit > 0 && records >= args.limit {
                log::info!("Record limit reached ({})", args.limit);
                break 'pages;
            }
            // One broken detail page must never end the run.
            match process_company(&fetcher, &extractor, &mut sink, &link, &args).await {
                Ok(true) => records += 1,
                Ok(false) => log::warn!("No data extracted from {}", link),
                Err(e) => log::error!("Failed to process {}: {}", link, e),
            }
        }

        if pages >= args.max_pages {
            log::info!("Page ceiling reached ({})", args.max_pages);
            break;
        }

        listing = match find_next_page(&doc, &page_url) {
            Some(next) if !visited_listings.mark_seen(next.as_str()) => {
                log::info!("Next page {} already visited, stopping pagination", next);
                None
            }
            Some(next) => {
                log::info!("Following next page: {}", next);
                match fetcher.get(&next).await {
                    Ok(body) => Url::parse(&next).ok().map(|url| (body, url)),
                    Err(e) => {
                        log::error!("Failed to fetch next page {}: {}", next, e);
                        None
                    }
                }
            }
            None => {
                log::info!("No next page control found, pagination complete");
                None
            }
        };
    }

    sink.flush()?;
    log::info!(
        "✅ Done: {} record(s) from {} listing page(s) in {:.1}s",
        records,
        pages,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Obtains the first search results page: submit the discovered search form,
/// falling back to the known search URLs when discovery or submission fails
/// or the response carries no detail links.
async fn first_listing(fetcher: &Fetcher, homepage: &str, start: &Url) -> Option<(String, Url)> {
    let form = {
        let doc = Html::parse_document(homepage);
        discover_search_form(&doc, start)
    };

    if let Some(form) = form {
        log::info!(
            "Submitting search form to {} ({:?})",
            form.action,
            form.method
        );
        let submitted = match form.method {
            FormMethod::Post => fetcher.post_form(&form.action, &form.fields).await,
            FormMethod::Get => fetcher.get_with_query(&form.action, &form.fields).await,
        };
        match submitted {
            Ok(body) => {
                if let Ok(url) = Url::parse(&form.action) {
                    let has_links = {
                        let doc = Html::parse_document(&body);
                        !extract_detail_links(&doc, &url).is_empty()
                    };
                    if has_links {
                        return Some((body, url));
                    }
                    log::warn!("Search submission yielded no detail links");
                }
            }
            Err(e) => log::warn!("Search form submission failed: {}", e),
        }
    } else {
        log::warn!("No search form found on homepage");
    }

    for candidate in FALLBACK_SEARCH_URLS {
        log::info!("Trying fallback search URL: {}", candidate);
        match fetcher.get(candidate).await {
            Ok(body) => {
                if let Ok(url) = Url::parse(candidate) {
                    return Some((body, url));
                }
            }
            Err(e) => log::warn!("Fallback {} failed: {}", candidate, e),
        }
    }
    None
}

/// Fetch one detail page, extract its record, persist it and pull down any
/// attached documents. Returns false when the page produced no data at all.
async fn process_company(
    fetcher: &Fetcher,
    extractor: &FieldExtractor,
    sink: &mut RecordSink<std::fs::File>,
    url: &str,
    args: &Args,
) -> Result<bool, ScraperError> {
    log::info!("Processing company: {}", url);
    let html = fetcher.get(url).await?;
    snapshot(args, "company", &html);

    let parsed =
        Url::parse(url).map_err(|e| ScraperError::InvalidUrl(format!("{}: {}", url, e)))?;
    let record = extractor.extract(&html, &parsed);
    if record.is_empty() {
        return Ok(false);
    }

    if log::log_enabled!(log::Level::Debug) {
        log::debug!(
            "Extracted: {}",
            serde_json::to_string(&record).unwrap_or_default()
        );
    }
    sink.append(&record)?;
    log::info!(
        "Saved record for: {}",
        if record.company_name.is_empty() {
            url
        } else {
            &record.company_name
        }
    );

    if !args.skip_files && !record.file_urls.is_empty() {
        download_files(fetcher, &record.file_urls, &args.downloads_dir).await;
    }
    Ok(true)
}

async fn download_files(fetcher: &Fetcher, urls: &[String], dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        log::warn!("Could not create {}: {}", dir.display(), e);
        return;
    }
    for url in urls {
        match fetcher.get_bytes(url).await {
            Ok(bytes) => {
                let path = dir.join(file_name_for(url));
                match std::fs::write(&path, &bytes) {
                    Ok(()) => log::info!("Saved document {}", path.display()),
                    Err(e) => log::warn!("Could not write {}: {}", path.display(), e),
                }
            }
            Err(e) => log::warn!("Document download failed for {}: {}", url, e),
        }
    }
}

fn file_name_for(url: &str) -> String {
    let parsed = Url::parse(url).ok();
    let segment = parsed
        .as_ref()
        .and_then(|u| u.path_segments().and_then(|mut s| s.next_back()))
        .filter(|s| !s.is_empty());
    let has_query = parsed.as_ref().and_then(|u| u.query()).is_some();

    match segment {
        // Distinct documents can share a path and differ only in the query
        // string (`/allegato?id=9` vs `?id=10`), so a digest of the full URL
        // goes into the name.
        Some(name) if has_query => match name.rsplit_once('.') {
            Some((stem, ext)) => format!("{}_{:08x}.{}", stem, url_digest(url), ext),
            None => format!("{}_{:08x}", name, url_digest(url)),
        },
        Some(name) => name.to_string(),
        None => {
            let ts = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            format!("document_{}", ts)
        }
    }
}

fn url_digest(url: &str) -> u32 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    hasher.finish() as u32
}

fn snapshot(args: &Args, role: &str, body: &str) {
    if !args.debug {
        return;
    }
    match save_snapshot(&args.debug_dir, role, body) {
        Ok(path) => log::debug!("Saved {} snapshot to {}", role, path.display()),
        Err(e) => log::warn!("Could not save {} snapshot: {}", role, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_only_documents_get_distinct_names() {
        let a = file_name_for("https://startup.registroimprese.it/allegato?id=9");
        let b = file_name_for("https://startup.registroimprese.it/allegato?id=10");
        assert_ne!(a, b);
        assert!(a.starts_with("allegato_"));
        assert!(b.starts_with("allegato_"));
    }

    #[test]
    fn plain_document_keeps_its_file_name() {
        assert_eq!(
            file_name_for("https://registry.example/docs/bilancio.pdf"),
            "bilancio.pdf"
        );
    }

    #[test]
    fn query_variant_keeps_the_extension() {
        let a = file_name_for("https://registry.example/docs/bilancio.pdf?v=2");
        let b = file_name_for("https://registry.example/docs/bilancio.pdf?v=3");
        assert!(a.starts_with("bilancio_"));
        assert!(a.ends_with(".pdf"));
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_stable_for_the_same_url() {
        let url = "https://registry.example/allegato?id=9";
        assert_eq!(file_name_for(url), file_name_for(url));
    }
}
