//! Single consumer of the source event stream; routes each event into the
//! owning index's mailbox.

use pgsync_models::{Event, Index, RelationUpdateEvent, WaitingEvents};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub struct Dispatcher {
    mailboxes: HashMap<String, Arc<WaitingEvents>>,
}

impl Dispatcher {
    pub fn new(indices: impl IntoIterator<Item = (Arc<Index>, Arc<WaitingEvents>)>) -> Self {
        Dispatcher {
            mailboxes: indices
                .into_iter()
                .map(|(index, waiting)| (index.name.clone(), waiting))
                .collect(),
        }
    }

    /// Consumes the event channel until every sender is gone.
    pub async fn run(&self, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
    }

    pub fn dispatch(&self, event: Event) {
        let Some(waiting) = self.mailboxes.get(event.index()) else {
            warn!("Dropping event for unknown index {}", event.index());
            return;
        };

        match event {
            Event::Insert { reference, .. } => waiting.inserts.push(reference),
            Event::Delete { reference, .. } => waiting.deletes.push(reference),
            Event::Update {
                reference,
                soft_deleted,
                previously_soft_deleted,
                ..
            } => {
                // Filter transitions become logical insert/delete.
                if soft_deleted && !previously_soft_deleted {
                    waiting.deletes.push(reference);
                } else if !soft_deleted && previously_soft_deleted {
                    waiting.inserts.push(reference);
                } else {
                    waiting.updates.push(reference);
                }
            }
            Event::RelationUpdate {
                relation,
                reference,
                pivot,
                ..
            } => waiting.relation_updates.push(RelationUpdateEvent {
                relation,
                reference,
                pivot,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgsync_config::IndexMapping;

    fn dispatcher() -> (Dispatcher, Arc<WaitingEvents>) {
        let mapping: IndexMapping =
            serde_yaml::from_str("name: users\ntable: users\nfields: [id]").unwrap();
        let index = Arc::new(Index::from_mapping(&mapping).unwrap());
        let waiting = Arc::new(WaitingEvents::new());
        (
            Dispatcher::new([(index, Arc::clone(&waiting))]),
            waiting,
        )
    }

    #[test]
    fn test_plain_events_reach_their_queues() {
        let (dispatcher, waiting) = dispatcher();

        dispatcher.dispatch(Event::Insert {
            index: "users".into(),
            reference: "1".into(),
        });
        dispatcher.dispatch(Event::Delete {
            index: "users".into(),
            reference: "2".into(),
        });
        dispatcher.dispatch(Event::Update {
            index: "users".into(),
            reference: "3".into(),
            soft_deleted: false,
            previously_soft_deleted: false,
        });

        assert_eq!(waiting.inserts.drain(10), ["1"]);
        assert_eq!(waiting.deletes.drain(10), ["2"]);
        assert_eq!(waiting.updates.drain(10), ["3"]);
    }

    #[test]
    fn test_soft_delete_transition_synthesises_a_delete() {
        let (dispatcher, waiting) = dispatcher();

        dispatcher.dispatch(Event::Update {
            index: "users".into(),
            reference: "2".into(),
            soft_deleted: true,
            previously_soft_deleted: false,
        });

        assert_eq!(waiting.deletes.drain(10), ["2"]);
        assert!(waiting.updates.is_empty());
        assert!(waiting.inserts.is_empty());
    }

    #[test]
    fn test_soft_undelete_transition_synthesises_an_insert() {
        let (dispatcher, waiting) = dispatcher();

        dispatcher.dispatch(Event::Update {
            index: "users".into(),
            reference: "2".into(),
            soft_deleted: false,
            previously_soft_deleted: true,
        });

        assert_eq!(waiting.inserts.drain(10), ["2"]);
        assert!(waiting.updates.is_empty());
        assert!(waiting.deletes.is_empty());
    }

    #[test]
    fn test_still_soft_deleted_update_stays_an_update() {
        let (dispatcher, waiting) = dispatcher();

        dispatcher.dispatch(Event::Update {
            index: "users".into(),
            reference: "2".into(),
            soft_deleted: true,
            previously_soft_deleted: true,
        });

        assert_eq!(waiting.updates.drain(10), ["2"]);
    }

    #[test]
    fn test_relation_updates_land_in_the_relation_queue() {
        let (dispatcher, waiting) = dispatcher();

        dispatcher.dispatch(Event::RelationUpdate {
            index: "users".into(),
            relation: "roles".into(),
            reference: "5".into(),
            pivot: true,
        });

        let drained = waiting.relation_updates.drain(10);
        assert_eq!(
            drained,
            [RelationUpdateEvent {
                relation: "roles".into(),
                reference: "5".into(),
                pivot: true,
            }]
        );
    }

    #[test]
    fn test_unknown_index_is_dropped() {
        let (dispatcher, waiting) = dispatcher();
        dispatcher.dispatch(Event::Insert {
            index: "ghosts".into(),
            reference: "1".into(),
        });
        assert!(waiting.inserts.is_empty());
    }
}
