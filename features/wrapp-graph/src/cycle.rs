use std::{collections::HashSet, fmt, rc::Rc};

use crate::{key::Key, node::ConstructorNode};

/// One step of a dependency cycle: the key and the constructor providing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleEntry {
    pub key: Key,
    pub provider: String,
}

/// A closed dependency chain, the first and last entry name the same provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePath {
    pub entries: Vec<CycleEntry>,
}

impl fmt::Display for CyclePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .entries
            .iter()
            .map(|entry| format!("{} provided by '{}'", entry.key, entry.provider))
            .collect();
        f.write_str(&entries.join(" -> depends on "))
    }
}

/// Checks whether anything reachable from `node` depends on itself
pub(crate) fn detect_from(node: &Rc<ConstructorNode>) -> Result<(), CyclePath> {
    let mut walk = Walk::default();
    match walk.visit(None, node.clone()) {
        Some(cycle) => Err(cycle),
        None => Ok(()),
    }
}

/// Checks every node, sharing what was learned between them
pub(crate) fn detect_all<'a>(
    nodes: impl IntoIterator<Item = &'a Rc<ConstructorNode>>,
) -> Result<(), (Rc<ConstructorNode>, CyclePath)> {
    let mut walk = Walk::default();
    for node in nodes {
        if let Some(cycle) = walk.visit(None, node.clone()) {
            return Err((node.clone(), cycle));
        }
    }
    Ok(())
}

#[derive(Default)]
struct Walk {
    /// Nodes whose dependencies were fully explored without finding a cycle
    checked: HashSet<usize>,
    /// Current chain, each node with the key it was reached through
    chain: Vec<(Option<Key>, Rc<ConstructorNode>)>,
}

impl Walk {
    fn visit(&mut self, via: Option<Key>, node: Rc<ConstructorNode>) -> Option<CyclePath> {
        let on_chain = self.chain.iter().position(|(_, n)| n.id() == node.id());
        if let (Some(start), Some(via)) = (on_chain, via.as_ref()) {
            // Keep only the loop itself, entered and left through the same key
            let mut entries: Vec<CycleEntry> = self.chain[start..]
                .iter()
                .map(|(key, n)| CycleEntry {
                    key: key.clone().unwrap_or_else(|| via.clone()),
                    provider: n.name().to_string(),
                })
                .collect();
            entries[0].key = via.clone();
            entries.push(CycleEntry {
                key: via.clone(),
                provider: node.name().to_string(),
            });
            return Some(CyclePath { entries });
        }

        if self.checked.contains(&node.id()) {
            return None;
        }

        self.chain.push((via, node.clone()));
        let origin = node.origin();
        for key in node.param_keys() {
            let Some(origin) = &origin else {
                break;
            };
            let providers: Vec<Rc<ConstructorNode>> = origin
                .ancestry()
                .iter()
                .flat_map(|scope| scope.providers_of(&key))
                .collect();
            for provider in providers {
                if let Some(cycle) = self.visit(Some(key.clone()), provider) {
                    return Some(cycle);
                }
            }
        }
        self.chain.pop();
        self.checked.insert(node.id());
        None
    }
}
