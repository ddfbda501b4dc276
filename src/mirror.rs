use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::models::{Contract, Fill, MirrorOrder, OrderAck};

/// Fraction of the poll interval used as the fill lookback window.
///
/// Keeping it under 1.0 is the only dedup in the engine: each fill is
/// visible to exactly one cycle as long as cycles start on schedule. There
/// is no seen-set, so a late cycle can replay a fill (and a slow platform
/// can hide one).
const WINDOW_SCALE: f64 = 0.95;

/// The brokerage surface the mirror loop consumes. `TvClient` is the live
/// implementation; tests drive the loop with a scripted in-memory broker.
#[async_trait]
pub trait Brokerage: Send + Sync {
    async fn recent_fills(&self, window: Duration) -> Result<Vec<Fill>>;
    async fn contract_item(&self, contract_id: i64) -> Result<Contract>;
    async fn place_order(&self, order: &MirrorOrder) -> Result<OrderAck>;
}

// =============== Mirror loop =================
pub struct Mirror<B: Brokerage> {
    leader: Arc<B>,
    follower: Arc<B>,
    poll_interval: Duration,
    step_pause: bool,
}

impl<B: Brokerage> Mirror<B> {
    pub fn new(leader: Arc<B>, follower: Arc<B>, poll_interval: Duration, step_pause: bool) -> Self {
        Self {
            leader,
            follower,
            poll_interval,
            step_pause,
        }
    }

    fn window(&self) -> Duration {
        self.poll_interval.mul_f64(WINDOW_SCALE)
    }

    /// Poll, resolve and replicate until `shutdown` flips to true. An
    /// in-flight cycle always runs to completion before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "mirror loop starting; polling leader fills every {:?} (window {:?})",
            self.poll_interval,
            self.window()
        );
        loop {
            info!("mirror cycle: begin");
            if let Err(e) = self.cycle().await {
                warn!("mirror cycle failed: {e}");
            }
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("mirror loop stopped");
    }

    /// One poll, resolve, replicate pass.
    ///
    /// Fetch and resolve failures abort the remainder of the cycle; a
    /// placement failure only skips the fill it belongs to. Fills are
    /// handled strictly in the order the platform returned them.
    async fn cycle(&self) -> Result<()> {
        let fills = self.leader.recent_fills(self.window()).await?;
        for fill in fills {
            let contract = self.leader.contract_item(fill.contract_id).await?;
            info!(
                "new fill detected: {:?} {} qty {}",
                fill.action, contract.name, fill.qty
            );
            let order = MirrorOrder::market(fill.action, contract.name, fill.qty);
            match self.follower.place_order(&order).await {
                Ok(ack) => info!(
                    "mirrored {:?} {} qty {} as order {}",
                    order.action, order.symbol, order.qty, ack.order_id
                ),
                Err(e) => error!(
                    "failed to mirror {:?} {} qty {}: {e}",
                    order.action, order.symbol, order.qty
                ),
            }
            if self.step_pause {
                pause_for_enter().await;
            }
        }
        Ok(())
    }
}

/// Manual supervision aid, off unless configured: hold the loop until the
/// operator presses Enter after each mirrored order.
async fn pause_for_enter() {
    info!("step pause: press Enter to continue");
    let _ = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::models::OrderAction;
    use chrono::Utc;
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedBroker {
        fills: Mutex<Vec<Fill>>,
        symbols: Mutex<HashMap<i64, String>>,
        fail_fills: AtomicBool,
        reject_orders: AtomicBool,
        placed: Mutex<Vec<MirrorOrder>>,
    }

    impl ScriptedBroker {
        fn with_fills(fills: Vec<Fill>, symbols: &[(i64, &str)]) -> Arc<Self> {
            let broker = Self::default();
            *broker.fills.lock().unwrap() = fills;
            *broker.symbols.lock().unwrap() = symbols
                .iter()
                .map(|(id, s)| (*id, s.to_string()))
                .collect();
            Arc::new(broker)
        }

        fn placed(&self) -> Vec<MirrorOrder> {
            self.placed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Brokerage for ScriptedBroker {
        async fn recent_fills(&self, _window: Duration) -> Result<Vec<Fill>> {
            if self.fail_fills.load(Ordering::SeqCst) {
                return Err(ApiError::Fetch {
                    what: "fill list",
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: "down".into(),
                });
            }
            Ok(self.fills.lock().unwrap().clone())
        }

        async fn contract_item(&self, contract_id: i64) -> Result<Contract> {
            match self.symbols.lock().unwrap().get(&contract_id) {
                Some(name) => Ok(Contract {
                    id: contract_id,
                    name: name.clone(),
                }),
                None => Err(ApiError::Fetch {
                    what: "contract item",
                    status: StatusCode::NOT_FOUND,
                    body: format!("no contract {contract_id}"),
                }),
            }
        }

        async fn place_order(&self, order: &MirrorOrder) -> Result<OrderAck> {
            self.placed.lock().unwrap().push(order.clone());
            if self.reject_orders.load(Ordering::SeqCst) {
                return Err(ApiError::Order {
                    status: StatusCode::BAD_REQUEST,
                    body: "rejected".into(),
                });
            }
            Ok(OrderAck { order_id: 42 })
        }
    }

    fn fill(action: OrderAction, contract_id: i64, qty: i32) -> Fill {
        Fill {
            action,
            contract_id,
            qty,
            timestamp: Utc::now(),
        }
    }

    fn mirror(leader: Arc<ScriptedBroker>, follower: Arc<ScriptedBroker>) -> Mirror<ScriptedBroker> {
        Mirror::new(leader, follower, Duration::from_secs(30), false)
    }

    #[tokio::test]
    async fn mirrors_fill_action_symbol_and_quantity() {
        let leader =
            ScriptedBroker::with_fills(vec![fill(OrderAction::Buy, 123, 5)], &[(123, "ESZ4")]);
        let follower = ScriptedBroker::with_fills(vec![], &[]);
        let m = mirror(leader, follower.clone());

        m.cycle().await.unwrap();

        assert_eq!(
            follower.placed(),
            vec![MirrorOrder::market(OrderAction::Buy, "ESZ4", 5)]
        );
        assert!(follower.placed()[0].is_automated);
    }

    #[tokio::test]
    async fn resolve_failure_aborts_rest_of_cycle_but_keeps_earlier_orders() {
        let leader = ScriptedBroker::with_fills(
            vec![
                fill(OrderAction::Buy, 1, 1),
                fill(OrderAction::Sell, 2, 2),
                fill(OrderAction::Buy, 3, 3),
            ],
            // contract 2 is unresolvable
            &[(1, "NQZ4"), (3, "ESZ4")],
        );
        let follower = ScriptedBroker::with_fills(vec![], &[]);
        let m = mirror(leader, follower.clone());

        let err = m.cycle().await.unwrap_err();
        assert!(matches!(err, ApiError::Fetch { what: "contract item", .. }));

        // Fill #1 went out before the failure; #3 is lost with the cycle.
        let placed = follower.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].symbol, "NQZ4");
    }

    #[tokio::test]
    async fn rejected_placement_is_soft_and_later_fills_still_run() {
        let leader = ScriptedBroker::with_fills(
            vec![fill(OrderAction::Buy, 1, 1), fill(OrderAction::Sell, 2, 2)],
            &[(1, "NQZ4"), (2, "ESZ4")],
        );
        let follower = ScriptedBroker::with_fills(vec![], &[]);
        follower.reject_orders.store(true, Ordering::SeqCst);
        let m = mirror(leader, follower.clone());

        // Both placements are rejected yet the cycle completes cleanly.
        m.cycle().await.unwrap();
        assert_eq!(follower.placed().len(), 2);
    }

    // Current behavior, asserted on purpose: nothing dedups by fill id, so
    // a fill visible in two cycles is mirrored twice. Changing this means
    // adding a watermark and updating this test deliberately.
    #[tokio::test]
    async fn fill_seen_in_two_cycles_is_mirrored_twice() {
        let leader =
            ScriptedBroker::with_fills(vec![fill(OrderAction::Sell, 7, 4)], &[(7, "GCZ4")]);
        let follower = ScriptedBroker::with_fills(vec![], &[]);
        let m = mirror(leader, follower.clone());

        m.cycle().await.unwrap();
        m.cycle().await.unwrap();

        assert_eq!(follower.placed().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_outlives_failed_cycles_and_honors_shutdown() {
        let leader = ScriptedBroker::with_fills(vec![], &[]);
        leader.fail_fills.store(true, Ordering::SeqCst);
        let follower = ScriptedBroker::with_fills(vec![], &[]);
        let m = Arc::new(mirror(leader, follower));

        let (tx, rx) = watch::channel(false);
        let worker = {
            let m = m.clone();
            tokio::spawn(async move { m.run(rx).await })
        };

        // Several failing cycles elapse, then shutdown stops the loop.
        tokio::time::sleep(Duration::from_secs(95)).await;
        tx.send(true).unwrap();
        worker.await.unwrap();
    }

    #[test]
    fn window_is_scaled_below_the_poll_interval() {
        let leader = ScriptedBroker::with_fills(vec![], &[]);
        let follower = ScriptedBroker::with_fills(vec![], &[]);
        let m = Mirror::new(leader, follower, Duration::from_secs(60), false);
        assert_eq!(m.window(), Duration::from_secs_f64(57.0));
        assert!(m.window() < m.poll_interval);
    }
}
