// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Map Mercurial wire commands to their argument framing.
// Author: Lukas Bower

//! Argument schemas for known wire commands.
//!
//! The server reads exactly one header per schema entry, so framing depends on
//! the command name. Commands missing from this table carry no arguments as
//! far as the decoder is concerned.

/// One header slot in a command's argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    /// A named argument sent as `<name> <length>` plus value.
    Named(&'static str),
    /// A `* <count>` block of further named arguments.
    Variadic,
}

use ArgSpec::{Named, Variadic};

const NONE: &[ArgSpec] = &[];

static SCHEMAS: &[(&str, &[ArgSpec])] = &[
    ("batch", &[Named("cmds"), Variadic]),
    ("between", &[Named("pairs")]),
    ("branchmap", NONE),
    ("branches", &[Named("nodes")]),
    ("capabilities", NONE),
    ("changegroup", &[Named("roots")]),
    ("changegroupsubset", &[Named("bases"), Named("heads")]),
    ("clonebundles", NONE),
    ("clonebundles_manifest", NONE),
    ("debugwireargs", &[Named("one"), Named("two"), Variadic]),
    ("getbundle", &[Variadic]),
    ("heads", NONE),
    ("hello", NONE),
    ("known", &[Named("nodes"), Variadic]),
    ("listkeys", &[Named("namespace")]),
    ("lookup", &[Named("key")]),
    ("protocaps", &[Named("caps")]),
    ("pushkey", &[Named("namespace"), Named("key"), Named("old"), Named("new")]),
    ("stream_out", NONE),
    ("unbundle", &[Named("heads")]),
];

/// Return the argument schema for `command`, if it is a known command.
#[must_use]
pub fn lookup(command: &str) -> Option<&'static [ArgSpec]> {
    SCHEMAS
        .iter()
        .find(|(name, _)| *name == command)
        .map(|(_, schema)| *schema)
}

/// Return the argument schema for `command`, empty for unknown commands.
#[must_use]
pub fn schema_for(command: &str) -> &'static [ArgSpec] {
    lookup(command).unwrap_or(NONE)
}

/// True when `command` appears in the schema table.
#[must_use]
pub fn is_known(command: &str) -> bool {
    lookup(command).is_some()
}

/// Iterate every known command name.
pub fn known_commands() -> impl Iterator<Item = &'static str> {
    SCHEMAS.iter().map(|(name, _)| *name)
}
