//! Thin administrative command adapter (§6 "Administrative command
//! surface"): translates already-tokenized subcommand/args into calls on
//! [`crate::Context`]. Not tied to any wire protocol — protocol dispatch
//! itself is out of scope (§1).
//!
//! Grounded on the source's `numa_config_command`/`numa_migrate_command`/
//! `numa_strategy_command` split: one function per top-level verb
//! (`config`, `migrate`, `slot`), each parsing its own argument shape and
//! mapping errors to the short strings §7 specifies.

use crate::error::NumaError;
use crate::migration::KeyStore;
use crate::node::NodeId;
use crate::Context;

/// Result of one administrative command (§6 "Errors surface as structured
/// messages... success surfaces as OK or typed data").
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Ok,
    Data(String),
    Err(String),
}

impl From<NumaError> for CommandReply {
    fn from(e: NumaError) -> Self {
        CommandReply::Err(e.as_user_message())
    }
}

/// `config get|set|stats|rebalance ...` (§6).
pub fn config(ctx: &Context, args: &[&str]) -> CommandReply {
    match args {
        ["get"] => {
            let cfg = ctx.placement.config();
            CommandReply::Data(format!(
                "strategy={} cxl_optimization={} balance_threshold={}",
                cfg.strategy.as_str(),
                cfg.cxl_optimised,
                cfg.balance_threshold
            ))
        }
        ["set", "strategy", value] => match crate::config::PlacementStrategyName::parse(value) {
            Some(strategy) => {
                ctx.placement.set_strategy(strategy);
                CommandReply::Ok
            }
            None => CommandReply::Err("Invalid argument: unknown strategy".to_string()),
        },
        ["set", "cxl_optimization", value] => match parse_bool_flag(value) {
            Some(on) => {
                ctx.placement.set_cxl_optimised(on);
                CommandReply::Ok
            }
            None => CommandReply::Err("Invalid argument: expected on/off/yes/1/0".to_string()),
        },
        ["set", "balance_threshold", value] => match value.parse::<f64>() {
            Ok(percent) if (0.0..=100.0).contains(&percent) => {
                ctx.placement.set_balance_threshold(percent / 100.0);
                CommandReply::Ok
            }
            _ => CommandReply::Err("Invalid argument: expected 0..100".to_string()),
        },
        ["set", "weight", node, value] => {
            match (node.parse::<i32>(), value.parse::<u32>()) {
                (Ok(node_id), Ok(weight)) if (0..=1000).contains(&weight) => {
                    ctx.placement.set_weight(NodeId(node_id), weight);
                    CommandReply::Ok
                }
                _ => CommandReply::Err("Invalid argument: expected node 0..=1000 weight".to_string()),
            }
        }
        ["stats"] => {
            let util: Vec<String> = ctx
                .nodes()
                .iter()
                .map(|n| format!("node{}={:.3}", n.id.0, n.utilisation()))
                .collect();
            CommandReply::Data(util.join(" "))
        }
        ["rebalance"] => {
            if ctx.placement.should_rebalance(ctx.nodes()) {
                CommandReply::Data("rebalance triggered".to_string())
            } else {
                CommandReply::Data("no rebalance needed".to_string())
            }
        }
        _ => CommandReply::Err("Unknown subcommand".to_string()),
    }
}

/// `migrate key|db|stats|reset|info ...` (§6).
pub fn migrate(ctx: &Context, store: &mut dyn KeyStore, args: &[&str]) -> CommandReply {
    match args {
        ["key", key, node] => match node.parse::<i32>() {
            Ok(node_id) => ctx
                .migration
                .migrate_value(store, &ctx.allocator, key.as_bytes(), NodeId(node_id))
                .map(|_| CommandReply::Ok)
                .unwrap_or_else(Into::into),
            Err(_) => CommandReply::Err("Invalid target node".to_string()),
        },
        ["db", node] => match node.parse::<i32>() {
            Ok(node_id) => ctx
                .migration
                .migrate_all(store, &ctx.allocator, NodeId(node_id))
                .map(|_| CommandReply::Ok)
                .unwrap_or_else(Into::into),
            Err(_) => CommandReply::Err("Invalid target node".to_string()),
        },
        ["stats"] => {
            let s = ctx.migration.stats();
            CommandReply::Data(format!(
                "total={} successful={} failed={} cumulative_bytes={} cumulative_time_us={}",
                s.total, s.successful, s.failed, s.cumulative_bytes, s.cumulative_time_us
            ))
        }
        ["reset"] => {
            ctx.migration.reset_stats();
            CommandReply::Ok
        }
        ["info", key] => match ctx.hotness.get(key.as_bytes()) {
            Some(record) => CommandReply::Data(format!(
                "current_node={} hotness={} access_count={} available_nodes={}",
                record.current_node.0,
                record.hotness,
                record.access_count,
                ctx.nodes().len()
            )),
            None => CommandReply::Err("Key not found".to_string()),
        },
        _ => CommandReply::Err("Unknown subcommand".to_string()),
    }
}

/// `slot insert|remove|enable|disable|configure|list|status ...` (§6).
pub fn slot(ctx: &Context, args: &[&str]) -> CommandReply {
    match args {
        ["insert", id, name] => match id.parse::<usize>() {
            Ok(id) => ctx
                .scheduler
                .insert(id, name)
                .map(|_| CommandReply::Ok)
                .unwrap_or_else(Into::into),
            Err(_) => CommandReply::Err("Invalid argument: slot id".to_string()),
        },
        ["remove", id] => with_slot_id(id, |id| ctx.scheduler.remove(id)),
        ["enable", id] => with_slot_id(id, |id| ctx.scheduler.enable(id)),
        ["disable", id] => with_slot_id(id, |id| ctx.scheduler.disable(id)),
        ["configure", id, key, value] => match id.parse::<usize>() {
            Ok(id) => ctx
                .scheduler
                .configure(id, key, value)
                .map(|_| CommandReply::Ok)
                .unwrap_or_else(Into::into),
            Err(_) => CommandReply::Err("Invalid argument: slot id".to_string()),
        },
        ["list"] => {
            let lines: Vec<String> = ctx
                .scheduler
                .list()
                .into_iter()
                .map(|s| format!("{}: {} ({:?}) enabled={}", s.id, s.name, s.priority, s.enabled))
                .collect();
            CommandReply::Data(lines.join("\n"))
        }
        ["status", id] => match id.parse::<usize>() {
            Ok(id) => match ctx.scheduler.status(id) {
                Ok(status) => CommandReply::Data(format!(
                    "{}: {} priority={:?} enabled={} executions={} failures={}",
                    status.id, status.name, status.priority, status.enabled, status.execute_count, status.failure_count
                )),
                Err(e) => e.into(),
            },
            Err(_) => CommandReply::Err("Invalid argument: slot id".to_string()),
        },
        _ => CommandReply::Err("Unknown subcommand".to_string()),
    }
}

fn with_slot_id(id: &str, f: impl FnOnce(usize) -> crate::error::Result<()>) -> CommandReply {
    match id.parse::<usize>() {
        Ok(id) => f(id).map(|_| CommandReply::Ok).unwrap_or_else(Into::into),
        Err(_) => CommandReply::Err("Invalid argument: slot id".to_string()),
    }
}

fn parse_bool_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "yes" | "1" => Some(true),
        "off" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::valuekind::HostValue;

    struct EmptyStore;
    impl KeyStore for EmptyStore {
        fn get_mut(&mut self, _key: &[u8]) -> Option<&mut dyn HostValue> {
            None
        }
        fn keys(&self) -> Vec<Vec<u8>> {
            Vec::new()
        }
    }

    #[test]
    fn config_set_strategy_then_get_reflects_it() {
        let ctx = Context::new(2, crate::ContextConfig::default());
        assert_eq!(config(&ctx, &["set", "strategy", "round-robin"]), CommandReply::Ok);
        match config(&ctx, &["get"]) {
            CommandReply::Data(s) => assert!(s.contains("round-robin")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn config_set_weight_out_of_range_is_invalid() {
        let ctx = Context::new(2, crate::ContextConfig::default());
        match config(&ctx, &["set", "weight", "0", "5000"]) {
            CommandReply::Err(_) => {}
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn migrate_key_missing_reports_key_not_found() {
        let ctx = Context::new(2, crate::ContextConfig::default());
        let mut store = EmptyStore;
        assert_eq!(
            migrate(&ctx, &mut store, &["key", "missing", "1"]),
            CommandReply::Err("Key not found".to_string())
        );
    }

    #[test]
    fn slot_insert_unknown_name_reports_not_found() {
        let ctx = Context::new(2, crate::ContextConfig::default());
        assert_eq!(
            slot(&ctx, &["insert", "2", "bogus"]),
            CommandReply::Err("Key not found".to_string())
        );
    }

    #[test]
    fn slot_insert_then_configure_then_status() {
        let ctx = Context::new(2, crate::ContextConfig::default());
        assert_eq!(slot(&ctx, &["insert", "1", "composite-lru"]), CommandReply::Ok);
        assert_eq!(slot(&ctx, &["configure", "1", "migrate_threshold", "7"]), CommandReply::Ok);
        match slot(&ctx, &["status", "1"]) {
            CommandReply::Data(s) => assert!(s.contains("composite-lru")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
