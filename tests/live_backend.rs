//! Smoke test against a real project
//!
//! Runs only when `SUPABASE_URL` and `SUPABASE_ANON_KEY` are set, either in
//! the environment or in a `.env` file.

use dotenv::dotenv;
use skillfeed::config::Config;
use skillfeed::feed::{load_feed, FeedQuery};
use skillfeed::videos::categories;
use skillfeed::Skillfeed;

#[tokio::test]
async fn test_anonymous_reads() {
    dotenv().ok();
    let Ok(config) = Config::from_env() else {
        eprintln!("SUPABASE_URL / SUPABASE_ANON_KEY not set, skipping");
        return;
    };
    let client = Skillfeed::from_config(config).unwrap();
    let backend = client.backend();

    let categories = categories(backend.as_ref()).await.unwrap();
    assert!(categories.iter().all(|c| !c.id.is_empty()));

    let feed = load_feed(backend.as_ref(), None, &FeedQuery::default().page(0, 5))
        .await
        .unwrap();
    assert!(feed.len() <= 5);
    assert!(feed.iter().all(|card| !card.user_liked));
}
