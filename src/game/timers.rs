//! Cancellable one-shot timers owned by a room

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::instance::RoomCommand;
use super::{TimerAction, TimerKey};

/// Pending deferred mutations of one room.
///
/// Each timer is a task that sleeps and then posts its action back into the
/// room mailbox, so the mutation runs on the room's own task. Arming a key
/// that is already pending aborts the old timer first.
#[derive(Debug)]
pub struct TimerRegistry {
    mailbox: mpsc::UnboundedSender<RoomCommand>,
    pending: HashMap<TimerKey, JoinHandle<()>>,
}

impl TimerRegistry {
    pub fn new(mailbox: mpsc::UnboundedSender<RoomCommand>) -> Self {
        Self {
            mailbox,
            pending: HashMap::new(),
        }
    }

    pub fn arm(&mut self, after: Duration, action: TimerAction) {
        self.pending.retain(|_, task| !task.is_finished());

        let key = action.key();
        let mailbox = self.mailbox.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // Closed mailbox means the room is gone
            let _ = mailbox.send(RoomCommand::Timer(action));
        });

        if let Some(previous) = self.pending.insert(key, task) {
            debug!(?key, "Replacing pending timer");
            previous.abort();
        }
    }

    /// Cancel a single pending timer
    pub fn disarm(&mut self, key: &TimerKey) -> bool {
        match self.pending.remove(key) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel everything; used when the room shuts down
    pub fn cancel_all(&mut self) {
        for (_, task) in self.pending.drain() {
            task.abort();
        }
    }

    /// Timers that have not fired yet
    pub fn len(&self) -> usize {
        self.pending
            .values()
            .filter(|task| !task.is_finished())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{BuffKind, TimerKind};
    use uuid::Uuid;

    fn buff_expiry(player: Uuid, generation: u64) -> TimerAction {
        TimerAction::ExpireBuff {
            player,
            buff: BuffKind::Speed,
            generation,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new(tx);
        let player = Uuid::new_v4();
        timers.arm(
            Duration::from_secs(3),
            TimerAction::Respawn { player },
        );

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        match rx.try_recv() {
            Ok(RoomCommand::Timer(TimerAction::Respawn { player: fired })) => {
                assert_eq!(fired, player)
            }
            _ => panic!("expected respawn timer"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new(tx);
        let player = Uuid::new_v4();

        timers.arm(Duration::from_secs(10), buff_expiry(player, 1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        timers.arm(Duration::from_secs(10), buff_expiry(player, 2));
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(5)).await;
        match rx.try_recv() {
            Ok(RoomCommand::Timer(action)) => assert_eq!(action, buff_expiry(player, 2)),
            _ => panic!("expected buff expiry"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_silences_every_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = TimerRegistry::new(tx);
        for _ in 0..3 {
            timers.arm(
                Duration::from_secs(1),
                TimerAction::Respawn {
                    player: Uuid::new_v4(),
                },
            );
        }
        assert_eq!(timers.len(), 3);

        let key = TimerKey {
            entity: Uuid::new_v4(),
            kind: TimerKind::Respawn,
        };
        assert!(!timers.disarm(&key));

        timers.cancel_all();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert!(timers.is_empty());
    }
}
