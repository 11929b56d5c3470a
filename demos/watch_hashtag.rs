use std::error::Error;

use mastodon_stream_sdk::api::{AccessToken, MastodonClient};
use mastodon_stream_sdk::stream::{Event, EventKind, StreamError, Subscription};

fn main() -> Result<(), Box<dyn Error>> {
    let base_url =
        std::env::var("MASTODON_URL").unwrap_or_else(|_| "https://mastodon.social".to_string());
    let access_token = std::env::var("MASTODON_ACCESS_TOKEN")?;
    let tag = std::env::args().nth(1).unwrap_or_else(|| "rustlang".to_string());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let token = AccessToken::bearer(access_token);
        let api = MastodonClient::new(base_url, token.clone())?;
        let streaming = api.streaming().await?;
        println!("health={}", streaming.health().await?);

        let stream = streaming.stream().await?;
        stream.register_consumer(|event: &Event| match event.kind() {
            EventKind::Update => {
                let content = event
                    .payload_json()
                    .ok()
                    .and_then(|status| status.get("content").cloned());
                println!("update stream={:?} content={content:?}", event.stream);
            }
            other => println!("event kind={other:?}"),
        })?;
        stream.register_error_consumer(|error: &StreamError| {
            eprintln!("stream error: {error}");
        })?;

        stream
            .change_subscription(&Subscription::subscribe_hashtag(&token, tag))
            .await?;

        tokio::select! {
            _ = stream.closed() => println!("server closed the stream"),
            _ = tokio::signal::ctrl_c() => stream.close().await?,
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
