use hn_pager_lib::{
    cli::{parse_args, Command},
    config::Config,
    logging::{format_error_report, init_logging},
    pager::{FetchNextPage, PaginatedItems},
    server::{monitoring, setup_server_with_addr},
    state::AppState,
    types::{Category, Item, ItemId, ItemKind},
};
use std::error::Error;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use log::{debug, info};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn Error + Send + Sync>;

/// Cancels `token` when a SIGTERM or SIGINT signal is received.
async fn handle_shutdown_signals(token: CancellationToken) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down.");
        }
        _ = sigint.recv() => {
            info!("SIGINT received, shutting down.");
        }
        _ = token.cancelled() => {}
    }

    token.cancel();
    Ok(())
}

fn print_story(rank: usize, item: &Item) {
    println!(
        "{rank:>3}. {} ({} points by {}, {} comments) [{}]",
        item.title.as_deref().unwrap_or("[untitled]"),
        item.score.unwrap_or_default(),
        item.author.as_deref().unwrap_or("[unknown]"),
        item.descendants.unwrap_or_default(),
        item.id
    );
}

fn print_comment(item: &Item) {
    let text = item.text.as_deref().unwrap_or_default();
    let preview: String = text.chars().take(160).collect();
    println!(
        "- {} [{}] ({} replies)\n  {}",
        item.author.as_deref().unwrap_or("[unknown]"),
        item.id,
        item.child_ids.len(),
        preview
    );
}

/// Fetches up to `pages` pages and prints every newly added item.
async fn drain_pages(
    session: &PaginatedItems,
    pages: usize,
    cancel: &CancellationToken,
    print: impl Fn(usize, &Item),
) -> Result<(), BoxError> {
    let mut printed = 0usize;
    for _ in 0..pages {
        match session.fetch_next_page(cancel).await {
            FetchNextPage::Exhausted => break,
            FetchNextPage::Cancelled => return Err("interrupted".into()),
            FetchNextPage::Failed(err) => return Err(err.into()),
            FetchNextPage::Fetched(_) | FetchNextPage::AlreadyFetching => {}
        }
        let items = session.items();
        for (index, item) in items.iter().enumerate().skip(printed) {
            print(index + 1, item);
        }
        printed = items.len();
    }

    let failed = session.failed_count();
    if failed > 0 {
        println!("({failed} items failed to load and will be retried on the next page)");
    }
    if !session.has_next_page() {
        println!("(end of list)");
    }
    Ok(())
}

async fn browse(
    state: &AppState,
    category: Category,
    pages: usize,
    cancel: &CancellationToken,
) -> Result<(), BoxError> {
    let session = PaginatedItems::for_category(state.upstream.clone(), category, None);
    drain_pages(&session, pages, cancel, print_story).await
}

async fn comments(
    state: &AppState,
    story_id: ItemId,
    pages: usize,
    cancel: &CancellationToken,
) -> Result<(), BoxError> {
    let story = state
        .story(story_id, cancel)
        .await?
        .ok_or_else(|| format!("item {story_id} does not exist or was removed"))?;
    print_story(1, &story);

    let session = PaginatedItems::for_comments(state.upstream.clone(), story.child_ids, None);
    drain_pages(&session, pages, cancel, |_, item| print_comment(item)).await
}

async fn search(
    state: &AppState,
    query: &str,
    tags: &str,
    page: u32,
    cancel: &CancellationToken,
) -> Result<(), BoxError> {
    let results = state
        .search
        .search_by_date(tags, query, page, None, cancel)
        .await?;
    println!(
        "{} hits, page {} of {}",
        results.nb_hits,
        results.page + 1,
        results.nb_pages.max(1)
    );
    for hit in results.hits {
        print_item(0, &Item::try_from(hit)?);
    }
    Ok(())
}

fn print_item(rank: usize, item: &Item) {
    match item.kind {
        ItemKind::Comment => print_comment(item),
        _ => print_story(rank, item),
    }
}

async fn front_page(state: &AppState, cancel: &CancellationToken) -> Result<(), BoxError> {
    for (index, item) in state.search.front_page(cancel).await?.iter().enumerate() {
        print_story(index + 1, item);
    }
    Ok(())
}

async fn recent(state: &AppState, cancel: &CancellationToken) -> Result<(), BoxError> {
    let activity = state.search.recent_activity(cancel).await?;
    println!("Recent submissions");
    for (index, item) in activity.stories.iter().enumerate() {
        print_story(index + 1, item);
    }
    println!("\nActive discussions");
    for item in &activity.discussions {
        print_comment(item);
    }
    Ok(())
}

async fn thread(
    state: &AppState,
    item_id: ItemId,
    cancel: &CancellationToken,
) -> Result<(), BoxError> {
    let tree = state.search.item_tree(item_id, cancel).await?;
    for item in tree.flatten().iter().filter(|item| !item.removed) {
        print_item(0, item);
    }
    Ok(())
}

async fn serve(state: Arc<AppState>, port: u16) -> Result<(), BoxError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let (local_addr, server_handle) = setup_server_with_addr(state.clone(), addr).await?;
    info!("Serving on {local_addr}");

    let purge_state = state.clone();
    let purge_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = purge_state.shutdown_token.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = purge_state.cache.purge_expired();
                    let evicted = purge_state.evict_idle_sessions();
                    debug!("Purged {purged} expired cache entries, evicted {evicted} idle sessions");
                }
            }
        }
    });

    server_handle.await?;
    purge_handle.await?;
    Ok(())
}

async fn run(config: Config, command: Command) -> Result<(), BoxError> {
    let shutdown_token = CancellationToken::new();
    let state = Arc::new(AppState::from_config(&config, shutdown_token.clone())?);
    {
        let mut registry = state.registry.write().await;
        monitoring::init_metrics(&mut registry).await;
    }
    let shutdown_handle = tokio::spawn(handle_shutdown_signals(shutdown_token.clone()));

    let result = match command {
        Command::Browse { category, pages } => {
            browse(&state, category, pages, &shutdown_token).await
        }
        Command::Comments { story_id, pages } => {
            comments(&state, story_id, pages, &shutdown_token).await
        }
        Command::Search { query, tags, page } => {
            search(&state, &query, &tags, page, &shutdown_token).await
        }
        Command::FrontPage => front_page(&state, &shutdown_token).await,
        Command::Recent => recent(&state, &shutdown_token).await,
        Command::Thread { item_id } => thread(&state, item_id, &shutdown_token).await,
        Command::Serve { port } => serve(state.clone(), port.unwrap_or(config.port)).await,
    };

    shutdown_token.cancel();
    shutdown_handle.await??;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let args = parse_args();
    init_logging("hn_pager", args.command.mode(), "info");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", format_error_report(&err));
            return ExitCode::FAILURE;
        }
    };
    debug!("Config loaded");

    match run(config, args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", format_error_report(err.as_ref()));
            ExitCode::FAILURE
        }
    }
}
