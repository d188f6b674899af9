use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    File,
    Package,
    Routine,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::File => "file",
            EntityKind::Package => "package",
            EntityKind::Routine => "routine",
        }
    }

    /// Tie-break rank for entities starting at the same byte.
    fn rank(self) -> u8 {
        match self {
            EntityKind::File => 0,
            EntityKind::Package => 1,
            EntityKind::Routine => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteSpan {
    pub start: usize,
    pub end: usize,
}

impl ByteSpan {
    pub fn strictly_contains(&self, offset: usize) -> bool {
        self.start < offset && offset < self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Named, range-bounded unit of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralEntity {
    pub name: String,
    pub kind: EntityKind,
    pub content: String,
    pub range: ByteSpan,
    /// 1-based line of `range.start`.
    pub line: usize,
}

impl StructuralEntity {
    pub fn new(name: String, kind: EntityKind, source: &str, range: ByteSpan) -> Self {
        let line = source
            .get(..range.start)
            .map(|prefix| prefix.matches('\n').count() + 1)
            .unwrap_or(1);
        Self {
            name,
            kind,
            content: source.get(range.start..range.end).unwrap_or("").to_string(),
            range,
            line,
        }
    }

    pub fn whole_file(path: &str, source: &str) -> Self {
        Self::new(
            path.to_string(),
            EntityKind::File,
            source,
            ByteSpan {
                start: 0,
                end: source.len(),
            },
        )
    }
}

/// `Package::name`, or `name` alone outside any package or when already qualified.
pub fn qualify(package: Option<&str>, name: &str) -> String {
    match package {
        Some(pkg) if !name.contains("::") => format!("{pkg}::{name}"),
        _ => name.to_string(),
    }
}

/// Assigns package spans, then orders entities the way every extractor reports them:
/// the whole-file entity first, the rest by start byte with packages before routines.
pub fn finish_entities(
    path: &str,
    source: &str,
    packages: Vec<(String, usize)>,
    routines: Vec<StructuralEntity>,
    include_file: bool,
) -> Vec<StructuralEntity> {
    let mut out = Vec::with_capacity(packages.len() + routines.len() + 1);
    for (idx, (name, start)) in packages.iter().enumerate() {
        let end = packages
            .get(idx + 1)
            .map(|(_, next)| *next)
            .unwrap_or(source.len());
        out.push(StructuralEntity::new(
            name.clone(),
            EntityKind::Package,
            source,
            ByteSpan { start: *start, end },
        ));
    }
    out.extend(routines);
    out.sort_by_key(|e| (e.range.start, e.kind.rank()));

    if include_file {
        out.insert(0, StructuralEntity::whole_file(path, source));
    }
    out
}

/// Package whose span covers `offset`, given packages in declaration order.
pub fn package_at(packages: &[(String, usize)], offset: usize) -> Option<&str> {
    packages
        .iter()
        .take_while(|(_, start)| *start <= offset)
        .last()
        .map(|(name, _)| name.as_str())
}
