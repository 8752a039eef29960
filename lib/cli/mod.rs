use crate::build_info;
use crate::types::{Category, ItemId};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Paginated Hacker News reader",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Page through a story list (top, new, best, ask, show, job)
    Browse {
        category: Category,

        #[arg(short, long, default_value_t = 1)]
        /// Number of pages to fetch
        pages: usize,
    },

    /// Page through the direct replies of a story
    Comments {
        story_id: ItemId,

        #[arg(short, long, default_value_t = 1)]
        pages: usize,
    },

    /// Newest-first keyword search
    Search {
        query: String,

        #[arg(long, default_value = "story")]
        /// Algolia tag filter, e.g. story, comment, author_pg
        tags: String,

        #[arg(long, default_value_t = 0)]
        page: u32,
    },

    /// Stories currently on the front page
    FrontPage,

    /// Newest stories and comments from the last hour
    Recent,

    /// Print a whole comment thread from the search index
    Thread { item_id: ItemId },

    /// Run the HTTP API
    Serve {
        #[arg(short, long)]
        /// Overrides PORT
        port: Option<u16>,
    },
}

impl Command {
    pub fn mode(&self) -> &'static str {
        match self {
            Command::Browse { .. } => "browse",
            Command::Comments { .. } => "comments",
            Command::Search { .. } => "search",
            Command::FrontPage => "front-page",
            Command::Recent => "recent",
            Command::Thread { .. } => "thread",
            Command::Serve { .. } => "serve",
        }
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
