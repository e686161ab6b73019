use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use movie_favorites::{
    config::Config,
    models::MovieId,
    session::{SessionTracker, SupabaseAuth},
    store::SupabaseFavoriteStore,
    FavoritesStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print favorited movie ids
    List,
    /// Print full favorite records, newest first
    Favorites,
    /// Favorite the movie, or unfavorite it if already favorited
    Toggle {
        movie_id: i64,
        title: String,
        poster_path: Option<String>,
    },
    /// Unfavorite the movie
    Remove { movie_id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let auth = SupabaseAuth::from_config(&config)?;
    let store = Arc::new(SupabaseFavoriteStore::from_config(&config)?);
    let tracker = Arc::new(SessionTracker::new());

    let (favorites, watcher) = FavoritesStore::start(tracker.clone(), store).await;
    tracker.initialize(&auth, config.identity_timeout()).await;
    favorites.settled().await;

    let result = run(&favorites, cli.command).await;
    watcher.shutdown().await;
    result
}

async fn run(favorites: &FavoritesStore, command: Command) -> anyhow::Result<()> {
    if !favorites.is_signed_in() {
        bail!("not signed in: set SUPABASE_ACCESS_TOKEN to a valid session token");
    }

    match command {
        Command::List => {
            for movie_id in favorites.favorite_ids().sorted() {
                println!("{}", movie_id);
            }
        }
        Command::Favorites => {
            for record in favorites.favorite_movies().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.movie_id,
                    record.movie_title,
                    record.movie_poster_path.as_deref().unwrap_or("-"),
                    record.created_at.to_rfc3339()
                );
            }
        }
        Command::Toggle {
            movie_id,
            title,
            poster_path,
        } => {
            let outcome = favorites
                .toggle(MovieId(movie_id), title, poster_path)
                .await?;
            println!("{}: {:?}", movie_id, outcome);
        }
        Command::Remove { movie_id } => {
            favorites.remove_favorite(MovieId(movie_id)).await?;
            println!("{}: removed", movie_id);
        }
    }

    Ok(())
}
