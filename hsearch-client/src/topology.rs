//! # Command Topology
//!
//! Purpose: Turn a logical index command into the concrete command(s) the
//! active deployment needs, each tagged with a hint saying which node it is
//! meant for.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `CommandTopology` is a trait; a sharded deployment
//!    adds an implementation instead of editing the client's execution loop.
//! 2. **Opaque Arguments**: Queries and field lists are passed through as raw
//!    bytes; no query syntax is interpreted here.

use std::fmt;

use bytes::Bytes;

use hsearch_common::{ClientResult, Endpoint};

use crate::resp::RespValue;

/// A concrete command ready to be written to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: Bytes,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<Bytes>) -> Self {
        Command {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }
}

impl fmt::Display for Command {
    // Only the name: arguments may carry document payloads.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.name))
    }
}

/// Where the index name goes in a command's argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier {
    /// `FT.SEARCH <index> ...`
    Leading,
    /// `FT.ALIASADD <alias> <index>`
    Trailing,
    /// `FT.CONFIG GET <option>`
    Unqualified,
}

/// Logical index operations understood by the search module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexCommand {
    Create,
    Alter,
    Add,
    AddHash,
    Search,
    Aggregate,
    Explain,
    Info,
    Get,
    MultiGet,
    Delete,
    Drop,
    SugAdd,
    SugGet,
    SugDel,
    SugLen,
    SynAdd,
    SynUpdate,
    SynDump,
    ConfigGet,
    ConfigSet,
    AliasAdd,
    AliasUpdate,
    AliasDel,
}

impl IndexCommand {
    /// Command name on the wire for a single-node deployment.
    pub fn wire_name(self) -> &'static str {
        match self {
            IndexCommand::Create => "FT.CREATE",
            IndexCommand::Alter => "FT.ALTER",
            IndexCommand::Add => "FT.ADD",
            IndexCommand::AddHash => "FT.ADDHASH",
            IndexCommand::Search => "FT.SEARCH",
            IndexCommand::Aggregate => "FT.AGGREGATE",
            IndexCommand::Explain => "FT.EXPLAIN",
            IndexCommand::Info => "FT.INFO",
            IndexCommand::Get => "FT.GET",
            IndexCommand::MultiGet => "FT.MGET",
            IndexCommand::Delete => "FT.DEL",
            IndexCommand::Drop => "FT.DROP",
            IndexCommand::SugAdd => "FT.SUGADD",
            IndexCommand::SugGet => "FT.SUGGET",
            IndexCommand::SugDel => "FT.SUGDEL",
            IndexCommand::SugLen => "FT.SUGLEN",
            IndexCommand::SynAdd => "FT.SYNADD",
            IndexCommand::SynUpdate => "FT.SYNUPDATE",
            IndexCommand::SynDump => "FT.SYNDUMP",
            IndexCommand::ConfigGet | IndexCommand::ConfigSet => "FT.CONFIG",
            IndexCommand::AliasAdd => "FT.ALIASADD",
            IndexCommand::AliasUpdate => "FT.ALIASUPDATE",
            IndexCommand::AliasDel => "FT.ALIASDEL",
        }
    }

    pub fn qualifier(self) -> Qualifier {
        match self {
            IndexCommand::ConfigGet | IndexCommand::ConfigSet | IndexCommand::AliasDel => {
                Qualifier::Unqualified
            }
            IndexCommand::AliasAdd | IndexCommand::AliasUpdate => Qualifier::Trailing,
            _ => Qualifier::Leading,
        }
    }

    /// Subcommand word that precedes the caller's arguments, if any.
    fn subcommand(self) -> Option<&'static str> {
        match self {
            IndexCommand::ConfigGet => Some("GET"),
            IndexCommand::ConfigSet => Some("SET"),
            _ => None,
        }
    }

    /// Builds the concrete command for `index` with the caller's arguments.
    pub fn qualify(self, index: &str, args: Vec<Bytes>) -> Command {
        let mut command = Command::new(self.wire_name());
        if let Some(sub) = self.subcommand() {
            command = command.arg(sub);
        }
        match self.qualifier() {
            Qualifier::Leading => command.arg(index.to_owned()).args(args),
            Qualifier::Trailing => command.args(args).arg(index.to_owned()),
            Qualifier::Unqualified => command.args(args),
        }
    }
}

/// Which node a shaped command should be sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetHint {
    /// Whatever node the provider currently targets.
    Any,
    /// A specific node of a multi-node deployment.
    Node(Endpoint),
}

/// A concrete command plus its routing hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedCommand {
    pub command: Command,
    pub target: TargetHint,
}

/// Shapes logical commands for a deployment topology.
pub trait CommandTopology: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Returns the ordered list of concrete commands to issue.
    fn shape(&self, index: &str, command: IndexCommand, args: Vec<Bytes>) -> Vec<ShapedCommand>;

    /// Combines the replies of the shaped commands, in issue order.
    fn aggregate(&self, replies: Vec<RespValue>) -> ClientResult<RespValue>;
}

/// One node serves everything: one logical command, one concrete command.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleNodeTopology;

impl CommandTopology for SingleNodeTopology {
    fn name(&self) -> &'static str {
        "single-node"
    }

    fn shape(&self, index: &str, command: IndexCommand, args: Vec<Bytes>) -> Vec<ShapedCommand> {
        vec![ShapedCommand {
            command: command.qualify(index, args),
            target: TargetHint::Any,
        }]
    }

    fn aggregate(&self, mut replies: Vec<RespValue>) -> ClientResult<RespValue> {
        if replies.len() == 1 {
            if let Some(reply) = replies.pop() {
                return Ok(reply);
            }
        }
        Ok(RespValue::Array(replies))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(command: &Command) -> Vec<String> {
        std::iter::once(command.name())
            .chain(command.arguments().iter().map(|arg| &arg[..]))
            .map(|word| String::from_utf8_lossy(word).into_owned())
            .collect()
    }

    #[test]
    fn single_node_shapes_one_command() {
        let shaped = SingleNodeTopology.shape(
            "products",
            IndexCommand::Search,
            vec![Bytes::from_static(b"@title:phone"), Bytes::from_static(b"LIMIT")],
        );
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0].target, TargetHint::Any);
        assert_eq!(
            words(&shaped[0].command),
            ["FT.SEARCH", "products", "@title:phone", "LIMIT"]
        );
    }

    #[test]
    fn alias_commands_put_index_last() {
        let command = IndexCommand::AliasAdd.qualify("products", vec![Bytes::from_static(b"p")]);
        assert_eq!(words(&command), ["FT.ALIASADD", "p", "products"]);
    }

    #[test]
    fn suggestion_commands_use_the_index_as_dictionary() {
        let add = IndexCommand::SugAdd.qualify(
            "products",
            vec![Bytes::from_static(b"phone"), Bytes::from_static(b"1.0")],
        );
        assert_eq!(words(&add), ["FT.SUGADD", "products", "phone", "1.0"]);

        let len = IndexCommand::SugLen.qualify("products", Vec::new());
        assert_eq!(words(&len), ["FT.SUGLEN", "products"]);
    }

    #[test]
    fn config_commands_are_not_qualified() {
        let command =
            IndexCommand::ConfigGet.qualify("products", vec![Bytes::from_static(b"TIMEOUT")]);
        assert_eq!(words(&command), ["FT.CONFIG", "GET", "TIMEOUT"]);
    }

    #[test]
    fn single_reply_passes_through_aggregation() {
        let reply = SingleNodeTopology
            .aggregate(vec![RespValue::Integer(7)])
            .unwrap();
        assert_eq!(reply, RespValue::Integer(7));

        let many = SingleNodeTopology
            .aggregate(vec![RespValue::Integer(1), RespValue::Integer(2)])
            .unwrap();
        assert_eq!(
            many,
            RespValue::Array(vec![RespValue::Integer(1), RespValue::Integer(2)])
        );
    }
}
