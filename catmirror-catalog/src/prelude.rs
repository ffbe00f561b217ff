// Copyright 2026 catmirror Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub use crate::{
    backend::{Backend, EncodingInfo},
    catalog::{Catalog, CatalogBuilder, CatalogConfig, ConfigError},
    class::CatalogClass,
    dispatch::{Change, Dispatched, LifespanEvent, Signal},
    layout::{FieldLoc, Repr, RowLayout},
    object::{
        attribute::Attribute,
        descriptor::{Column, Descriptor},
        encoding::Encoding,
        language::Language,
        namespace::Namespace,
        relation::Relation,
        routine::Routine,
        ty::Type,
        Mirror,
    },
    row::Row,
    session::Session,
    window::NativeWindow,
};
