//! Command handler for the cache console

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use assetkeep::{AssetHandle, Category, Group, ScopeId};
use keepcache::{CacheManager, ScopeEvents};
use parking_lot::Mutex;

use crate::manifest::{ManifestLoader, StubAsset};

/// Reply to one command line
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Integer(i64),
    Bulk(String),
    Error(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "+{}", s),
            Reply::Integer(n) => write!(f, ":{}", n),
            Reply::Bulk(s) => write!(f, "{}", s.trim_end()),
            Reply::Error(e) => write!(f, "-{}", e),
        }
    }
}

fn ok() -> Reply {
    Reply::Simple("OK".to_string())
}

fn wrong_args(command: &str) -> Reply {
    Reply::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.to_lowercase()
    ))
}

pub struct CommandHandler {
    manager: Arc<CacheManager>,
    events: ScopeEvents,
    loader: Arc<ManifestLoader>,
    handles: Mutex<HashMap<String, Arc<AssetHandle>>>,
}

impl CommandHandler {
    pub fn new(manager: Arc<CacheManager>, events: ScopeEvents, loader: Arc<ManifestLoader>) -> Self {
        Self {
            manager,
            events,
            loader,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle(&self, line: &str) -> Reply {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some((command, args)) = args.split_first() else {
            return Reply::Error("ERR empty command".to_string());
        };
        let command = command.to_uppercase();

        match command.as_str() {
            "PING" => Reply::Simple("PONG".to_string()),
            "REGISTER" => self.handle_register(args),
            "LOAD" => self.handle_load(args, false).await,
            "LOADARRAY" => self.handle_load(args, true).await,
            "INSTANTIATE" => self.handle_instantiate(args),
            "AUTORELEASE" => self.with_handle(&command, args, |h| {
                h.enable_auto_release();
                ok()
            }),
            "RELEASE" => self.with_handle(&command, args, |h| Reply::Integer(h.release() as i64)),
            "STATUS" => self.with_handle(&command, args, |h| Reply::Simple(h.status().as_str().to_string())),
            "UNLOAD" => match args {
                [path] => Reply::Integer(self.loader.unload(path) as i64),
                _ => wrong_args(&command),
            },
            "LIVE" => match args {
                [path] => Reply::Integer(self.loader.live_count(path) as i64),
                _ => wrong_args(&command),
            },
            "FIND" => self.handle_find(args),
            "COUNT" => self.handle_count(args),
            "RELEASEGROUP" => match args {
                [group] => match group.parse::<Group>() {
                    Ok(group) => Reply::Integer(self.manager.release_group(group) as i64),
                    Err(e) => Reply::Error(format!("ERR {}", e)),
                },
                _ => wrong_args(&command),
            },
            "RELEASECATEGORY" => match args {
                [group, category] => match parse_bucket(group, category) {
                    Ok((group, category)) => {
                        Reply::Integer(self.manager.release_category(group, category) as i64)
                    }
                    Err(reply) => reply,
                },
                _ => wrong_args(&command),
            },
            "ENDSCOPE" => match args {
                [scope] => match scope.parse::<u32>() {
                    Ok(scope) => Reply::Integer(self.events.end_scope(ScopeId(scope)) as i64),
                    Err(_) => Reply::Error("ERR invalid scope id".to_string()),
                },
                _ => wrong_args(&command),
            },
            "SWEEP" => Reply::Integer(self.manager.sweep() as i64),
            "STATS" => self.handle_stats(),
            "CANCEL" => Reply::Integer(self.manager.cancel_auto_release() as i64),
            "RESTART" => match self.manager.start_auto_release() {
                Ok(()) => ok(),
                Err(e) => Reply::Error(format!("ERR {}", e)),
            },
            "SLEEP" => match args {
                [ms] => match ms.parse::<u64>() {
                    Ok(ms) => {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        ok()
                    }
                    Err(_) => Reply::Error("ERR invalid duration".to_string()),
                },
                _ => wrong_args(&command),
            },
            _ => Reply::Error(format!("ERR unknown command '{}'", command)),
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<AssetHandle>> {
        self.handles.lock().get(name).cloned()
    }

    fn with_handle<F>(&self, command: &str, args: &[&str], f: F) -> Reply
    where
        F: FnOnce(&AssetHandle) -> Reply,
    {
        match args {
            [name] => match self.lookup(name) {
                Some(handle) => f(&handle),
                None => Reply::Error(format!("ERR no handle named '{}'", name)),
            },
            _ => wrong_args(command),
        }
    }

    fn handle_register(&self, args: &[&str]) -> Reply {
        let (name, group, category, scope) = match args {
            [name, group, category] => (name, group, category, None),
            [name, group, category, scope] => match scope.parse::<u32>() {
                Ok(scope) => (name, group, category, Some(ScopeId(scope))),
                Err(_) => return Reply::Error("ERR invalid scope id".to_string()),
            },
            _ => return wrong_args("register"),
        };
        let (group, category) = match parse_bucket(group, category) {
            Ok(bucket) => bucket,
            Err(reply) => return reply,
        };

        match self.manager.create_handle(group, category, scope) {
            Ok(handle) => {
                self.handles.lock().insert(name.to_string(), handle);
                ok()
            }
            Err(e) => Reply::Error(format!("ERR {}", e)),
        }
    }

    async fn handle_load(&self, args: &[&str], array: bool) -> Reply {
        let [name, path] = args else {
            return wrong_args(if array { "loadarray" } else { "load" });
        };
        let Some(handle) = self.lookup(name) else {
            return Reply::Error(format!("ERR no handle named '{}'", name));
        };

        if array {
            match handle.try_load_array::<StubAsset>(path).await {
                Ok(assets) => Reply::Integer(assets.len() as i64),
                Err(e) => Reply::Error(format!("ERR {}", e)),
            }
        } else {
            match handle.try_load::<StubAsset>(path).await {
                Ok(asset) => Reply::Simple(format!("OK {:?}", asset.kind()).to_uppercase()),
                Err(e) => Reply::Error(format!("ERR {}", e)),
            }
        }
    }

    fn handle_instantiate(&self, args: &[&str]) -> Reply {
        let (name, display) = match args {
            [name] => (name, None),
            [name, display] => (name, Some(*display)),
            _ => return wrong_args("instantiate"),
        };
        let Some(handle) = self.lookup(name) else {
            return Reply::Error(format!("ERR no handle named '{}'", name));
        };

        match handle.instantiate(display) {
            Some(instance) => Reply::Simple(instance.to_string()),
            None => Reply::Error("ERR cannot instantiate".to_string()),
        }
    }

    fn handle_find(&self, args: &[&str]) -> Reply {
        let [group, category, index] = args else {
            return wrong_args("find");
        };
        let (group, category) = match parse_bucket(group, category) {
            Ok(bucket) => bucket,
            Err(reply) => return reply,
        };
        let Ok(index) = index.parse::<usize>() else {
            return Reply::Error("ERR invalid index".to_string());
        };

        let Some(found) = self.manager.find(group, category, index) else {
            return Reply::Bulk("(nil)".to_string());
        };
        let name = self
            .handles
            .lock()
            .iter()
            .find(|(_, h)| AssetHandle::same(h, &found))
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| "?".to_string());
        Reply::Bulk(format!("{} ({})", name, found.status().as_str()))
    }

    fn handle_count(&self, args: &[&str]) -> Reply {
        let count = match args {
            [] => self.manager.count(),
            [group] => match group.parse::<Group>() {
                Ok(group) => self.manager.group_count(group),
                Err(e) => return Reply::Error(format!("ERR {}", e)),
            },
            [group, category] => match parse_bucket(group, category) {
                Ok((group, category)) => self.manager.category_count(group, category),
                Err(reply) => return reply,
            },
            _ => return wrong_args("count"),
        };
        Reply::Integer(count as i64)
    }

    fn handle_stats(&self) -> Reply {
        let stats = self.manager.stats();
        let report = format!(
            "{}\
             # Counters\n\
             registrations:{}\n\
             sweeps:{}\n\
             evictions:{}\n\
             forced_releases:{}\n\
             scope_teardowns:{}\n\
             reclaims:{}\n",
            self.manager.stats_report(),
            stats.registrations(),
            stats.sweeps(),
            stats.evictions(),
            stats.forced_releases(),
            stats.scope_teardowns(),
            self.loader.reclaims(),
        );
        Reply::Bulk(report)
    }
}

fn parse_bucket(group: &str, category: &str) -> Result<(Group, Category), Reply> {
    let group = group
        .parse::<Group>()
        .map_err(|e| Reply::Error(format!("ERR {}", e)))?;
    let category = category
        .parse::<Category>()
        .map_err(|e| Reply::Error(format!("ERR {}", e)))?;
    Ok((group, category))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{Manifest, SceneGraph};
    use assetkeep::Backend;
    use keepcache::CacheConfig;

    fn handler() -> CommandHandler {
        handler_with_scene().0
    }

    fn handler_with_scene() -> (CommandHandler, Arc<SceneGraph>) {
        let manifest: Manifest = serde_json::from_str(
            r#"{ "assets": [
                { "path": "game/hero", "kind": "prefab" },
                { "path": "menu/bg", "kind": "ui" },
                { "path": "menu/buttons", "kind": "ui", "count": 4 }
            ] }"#,
        )
        .unwrap();
        let loader = Arc::new(ManifestLoader::new(&manifest));
        let scene = Arc::new(SceneGraph::new());
        let backend = Backend::new(loader.clone(), scene.clone());
        let manager = Arc::new(CacheManager::new(backend, CacheConfig::default()));
        (CommandHandler::new(manager, ScopeEvents::new(8), loader), scene)
    }

    #[tokio::test]
    async fn test_ping() {
        let handler = handler();
        assert_eq!(handler.handle("ping").await, Reply::Simple("PONG".to_string()));
    }

    #[tokio::test]
    async fn test_register_load_find() {
        let handler = handler();

        assert_eq!(handler.handle("REGISTER hero game prefab 1").await, ok());
        assert_eq!(
            handler.handle("LOAD hero game/hero").await,
            Reply::Simple("OK PREFAB".to_string())
        );
        assert_eq!(
            handler.handle("FIND game prefab 0").await,
            Reply::Bulk("hero (setup)".to_string())
        );
        assert_eq!(handler.handle("COUNT game prefab").await, Reply::Integer(1));
        assert!(matches!(handler.handle("LOAD hero game/hero").await, Reply::Error(_)));
    }

    #[tokio::test]
    async fn test_sweep_after_unload() {
        let handler = handler();

        handler.handle("REGISTER bg menu ui").await;
        handler.handle("REGISTER keep menu ui").await;
        handler.handle("LOAD bg menu/bg").await;
        handler.handle("LOADARRAY keep menu/buttons").await;
        handler.handle("AUTORELEASE bg").await;

        assert_eq!(handler.handle("LIVE menu/buttons").await, Reply::Integer(4));
        assert_eq!(handler.handle("UNLOAD menu/bg").await, Reply::Integer(1));
        assert_eq!(handler.handle("SWEEP").await, Reply::Integer(1));
        assert_eq!(handler.handle("COUNT menu ui").await, Reply::Integer(1));
        assert_eq!(
            handler.handle("FIND menu ui 0").await,
            Reply::Bulk("keep (setup)".to_string())
        );
    }

    #[tokio::test]
    async fn test_instantiate_and_release() {
        let handler = handler();

        handler.handle("REGISTER hero game prefab").await;
        assert!(matches!(handler.handle("INSTANTIATE hero").await, Reply::Error(_)));
        handler.handle("LOAD hero game/hero").await;
        assert_eq!(handler.handle("INSTANTIATE hero Player").await, Reply::Simple("#0".to_string()));
        assert_eq!(
            handler.handle("STATUS hero").await,
            Reply::Simple("instantiated".to_string())
        );
        assert_eq!(handler.handle("RELEASE hero").await, Reply::Integer(1));
        assert_eq!(handler.handle("RELEASE hero").await, Reply::Integer(0));
    }

    #[tokio::test]
    async fn test_release_spares_sibling_instance() {
        let (handler, scene) = handler_with_scene();

        handler.handle("REGISTER a game prefab").await;
        handler.handle("REGISTER b game prefab").await;
        handler.handle("LOAD a game/hero").await;
        handler.handle("LOAD b game/hero").await;
        handler.handle("INSTANTIATE a").await;
        handler.handle("INSTANTIATE b").await;
        assert_eq!(scene.len(), 2);

        assert_eq!(handler.handle("RELEASE a").await, Reply::Integer(1));

        assert_eq!(scene.len(), 1);
        assert_eq!(
            handler.handle("STATUS b").await,
            Reply::Simple("instantiated".to_string())
        );
    }

    #[tokio::test]
    async fn test_release_group() {
        let handler = handler();

        handler.handle("REGISTER a menu ui").await;
        handler.handle("REGISTER b menu audio").await;
        assert_eq!(handler.handle("RELEASECATEGORY menu ui").await, Reply::Integer(1));
        assert_eq!(handler.handle("RELEASEGROUP menu").await, Reply::Integer(1));
        assert_eq!(handler.handle("COUNT").await, Reply::Integer(0));
    }

    #[tokio::test]
    async fn test_errors() {
        let handler = handler();

        assert!(matches!(handler.handle("").await, Reply::Error(_)));
        assert!(matches!(handler.handle("FLY away").await, Reply::Error(_)));
        assert!(matches!(handler.handle("REGISTER x lobby ui").await, Reply::Error(_)));
        assert!(matches!(handler.handle("REGISTER x menu mesh").await, Reply::Error(_)));
        assert!(matches!(handler.handle("LOAD ghost game/hero").await, Reply::Error(_)));
        assert!(matches!(handler.handle("FIND game prefab 0").await, Reply::Bulk(_)));
    }

    #[tokio::test]
    async fn test_stats_report() {
        let handler = handler();
        handler.handle("REGISTER hero game prefab").await;

        let Reply::Bulk(report) = handler.handle("STATS").await else {
            panic!("expected bulk reply");
        };
        assert!(report.contains("Group: Game, Total Count: 1"));
        assert!(report.contains("registrations:1"));
    }
}
