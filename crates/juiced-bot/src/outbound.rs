//! Durable outbound message delivery.
//!
//! Messages queued in the store are sent as chat messages in store order,
//! one at a time. A failed send increments the message's retry count; the
//! attempt that reaches `outbound_max_retries` marks it permanently failed.

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bot::Bot;
use crate::store::{OutboundMessage, StoreHandle};

/// Delivery loop, one poll per `outbound_interval`.
pub(crate) async fn run(bot: Bot) {
    let mut interval = tokio::time::interval(bot.config().outbound_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(store) = bot.store() else {
            continue;
        };
        if !bot.has_live_socket() {
            debug!("Outbound delivery skipped: not connected");
            continue;
        }
        if bot.room().read().channel.permissions.is_empty() {
            debug!("Outbound delivery skipped: permissions unknown");
            continue;
        }
        deliver_pending(&bot, store).await;
    }
}

/// Sends one batch of pending messages. Returns how many were delivered.
pub(crate) async fn deliver_pending(bot: &Bot, store: &StoreHandle) -> usize {
    let config = bot.config();
    let (limit, max_retries) = (config.outbound_limit, config.outbound_max_retries);
    let messages = match store
        .call(move |s| s.get_unsent_outbound_messages(limit, max_retries))
        .await
    {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "Failed to load outbound messages");
            return 0;
        }
    };

    let mut delivered = 0;
    for OutboundMessage {
        id,
        message,
        retry_count,
    } in messages
    {
        match bot.chat(&message).await {
            Ok(_) => {
                delivered += 1;
                info!(id, "Delivered outbound message");
                if let Err(e) = store.call(move |s| s.mark_outbound_sent(id)).await {
                    warn!(id, error = %e, "Failed to mark message sent");
                }
            }
            Err(err) => {
                let permanent = retry_count + 1 >= max_retries;
                warn!(id, attempt = retry_count + 1, permanent, error = %err, "Outbound message failed");
                let reason = err.to_string();
                if let Err(e) = store
                    .call(move |s| s.mark_outbound_failed(id, &reason, permanent))
                    .await
                {
                    warn!(id, error = %e, "Failed to mark message failed");
                }
                if err.is_transport() {
                    break;
                }
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::store::{MemoryStore, Store};
    use crate::testing::{FailingStore, FakeConnector, fake_socket, serve_channel};
    use std::sync::Arc;
    use std::time::Duration;

    async fn logged_in_bot(memory: &Arc<MemoryStore>) -> (Bot, crate::testing::FakeWire) {
        logged_in_with(StoreHandle::from_arc(memory.clone())).await
    }

    async fn logged_in_with(store: StoreHandle) -> (Bot, crate::testing::FakeWire) {
        let (socket, wire) = fake_socket();
        serve_channel(&wire, "bot");
        let config = BotConfig::new("example.com", "lobby")
            .with_user("bot", None)
            .with_response_timeout(Duration::from_secs(1));
        let bot = Bot::builder(config)
            .connector(FakeConnector::with_sockets(vec![Arc::new(socket)]))
            .store(store)
            .build()
            .unwrap();
        bot.login().await.unwrap();
        bot.room().write().user.rank = 1.0;
        (bot, wire)
    }

    #[tokio::test]
    async fn delivers_in_order_and_marks_sent() {
        let memory = Arc::new(MemoryStore::new());
        let first = memory.enqueue_outbound("one").unwrap();
        let second = memory.enqueue_outbound("two").unwrap();
        let (bot, wire) = logged_in_bot(&memory).await;

        let delivered = deliver_pending(&bot, bot.store().unwrap()).await;

        assert_eq!(delivered, 2);
        let chats: Vec<_> = wire.sent().into_iter().filter(|f| f.contains("chatMsg")).collect();
        assert_eq!(chats.len(), 2);
        assert!(chats[0].contains("\"one\""));
        assert!(chats[1].contains("\"two\""));
        assert!(memory.outbound_state(first).unwrap().0);
        assert!(memory.outbound_state(second).unwrap().0);
    }

    #[tokio::test]
    async fn unreadable_store_delivers_nothing() {
        let (bot, wire) = logged_in_with(StoreHandle::new(FailingStore)).await;

        let delivered = deliver_pending(&bot, bot.store().unwrap()).await;

        assert_eq!(delivered, 0);
        assert!(!wire.sent().iter().any(|f| f.contains("chatMsg")));
        assert!(bot.socket().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn last_retry_marks_message_permanently_failed() {
        let memory = Arc::new(MemoryStore::new());
        let id = memory.enqueue_outbound("flood").unwrap();
        memory.mark_outbound_failed(id, "timeout", false).unwrap();
        memory.mark_outbound_failed(id, "timeout", false).unwrap();
        let (bot, wire) = logged_in_bot(&memory).await;
        wire.respond(|frame| {
            if frame.contains("chatMsg") {
                vec![r#"42["noflood",{"action":"chat","msg":"You are chatting too fast"}]"#.into()]
            } else {
                vec![]
            }
        });

        let delivered = deliver_pending(&bot, bot.store().unwrap()).await;

        assert_eq!(delivered, 0);
        let (sent, failed, retries, error) = memory.outbound_state(id).unwrap();
        assert!(!sent);
        assert!(failed);
        assert_eq!(retries, 3);
        assert!(error.unwrap().contains("too fast"));
        assert!(memory.get_unsent_outbound_messages(10, 3).unwrap().is_empty());
    }

    #[tokio::test]
    async fn earlier_failures_are_retried_later() {
        let memory = Arc::new(MemoryStore::new());
        let id = memory.enqueue_outbound("hello").unwrap();
        let (bot, wire) = logged_in_bot(&memory).await;
        wire.respond(|frame| {
            if frame.contains("chatMsg") {
                vec![r#"42["spamFiltered",{"msg":"filtered"}]"#.into()]
            } else {
                vec![]
            }
        });

        deliver_pending(&bot, bot.store().unwrap()).await;

        let (sent, failed, retries, _) = memory.outbound_state(id).unwrap();
        assert!(!sent);
        assert!(!failed);
        assert_eq!(retries, 1);
    }
}
