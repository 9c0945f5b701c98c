//! In-memory filesystem. Serves as the writable root that other volumes are
//! mounted under.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::vfs::{
    DirEntry, FilePath, FileSystem, FsError, FsType, Node, NodeOps, NodeType, OpenFlags, SeekFrom,
};

/// Longest file name, in bytes.
pub const MAX_NAME_LEN: usize = 120;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct MemFsConfig {
    /// Upper bound on the bytes held by all file buffers together.
    pub capacity_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct MemFs {
    state: Arc<Mutex<MemFsState>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct NodeId(usize);

const ROOT: NodeId = NodeId(0);

#[derive(Debug)]
struct MemFsState {
    nodes: Vec<MemNode>,
    config: MemFsConfig,
    /// Sum of the capacities of every file buffer.
    allocated: usize,
}

#[derive(Debug)]
struct MemNode {
    name: String,
    kind: MemNodeKind,
}

#[derive(Debug)]
enum MemNodeKind {
    /// The buffer's length is the logical file size, its capacity the
    /// allocated size.
    File(Vec<u8>),
    Directory(Vec<NodeId>),
}

impl MemNode {
    fn node_type(&self) -> NodeType {
        match self.kind {
            MemNodeKind::File(_) => NodeType::File,
            MemNodeKind::Directory(_) => NodeType::Directory,
        }
    }

    fn size(&self) -> u64 {
        match &self.kind {
            MemNodeKind::File(data) => data.len() as u64,
            MemNodeKind::Directory(_) => 0,
        }
    }
}

impl MemFs {
    pub fn new(config: MemFsConfig) -> Self {
        let root = MemNode {
            name: String::new(),
            kind: MemNodeKind::Directory(Vec::new()),
        };
        Self {
            state: Arc::new(Mutex::new(MemFsState {
                nodes: alloc::vec![root],
                config,
                allocated: 0,
            })),
        }
    }

    /// Changes the byte budget. Existing buffers are kept even if they
    /// exceed the new limit.
    pub fn set_capacity_limit(&self, limit: Option<usize>) {
        self.state.lock().config.capacity_limit = limit;
    }

    /// Bytes currently allocated to file buffers.
    pub fn allocated(&self) -> usize {
        self.state.lock().allocated
    }
}

impl MemFsState {
    fn node(&self, id: NodeId) -> &MemNode {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut MemNode {
        &mut self.nodes[id.0]
    }

    fn child(&self, dir: NodeId, name: &str) -> Result<Option<NodeId>, FsError> {
        let MemNodeKind::Directory(children) = &self.node(dir).kind else {
            return Err(FsError::NotADirectory);
        };
        Ok(children
            .iter()
            .copied()
            .find(|&child| self.node(child).name == name))
    }

    fn create(&mut self, parent: NodeId, name: &str, node_type: NodeType) -> Result<NodeId, FsError> {
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        let id = NodeId(self.nodes.len());
        let MemNodeKind::Directory(children) = &mut self.node_mut(parent).kind else {
            return Err(FsError::NotADirectory);
        };
        children.push(id);
        let kind = match node_type {
            NodeType::File => MemNodeKind::File(Vec::new()),
            NodeType::Directory => MemNodeKind::Directory(Vec::new()),
        };
        self.nodes.push(MemNode {
            name: name.to_string(),
            kind,
        });
        Ok(id)
    }

    fn file_mut(&mut self, id: NodeId) -> &mut Vec<u8> {
        match &mut self.nodes[id.0].kind {
            MemNodeKind::File(data) => data,
            MemNodeKind::Directory(_) => panic!("memfs node {id:?} is not a file"),
        }
    }

    fn truncate(&mut self, id: NodeId) {
        let data = self.file_mut(id);
        let freed = data.capacity();
        *data = Vec::new();
        self.allocated -= freed;
    }

    /// Makes room for `required` bytes in a file buffer, doubling its
    /// capacity when the budget allows, otherwise growing it to exactly
    /// `required`.
    fn reserve(&mut self, id: NodeId, required: usize) -> Result<(), FsError> {
        let limit = self.config.capacity_limit.unwrap_or(usize::MAX);
        let others = self.allocated - self.file_mut(id).capacity();
        let data = self.file_mut(id);
        let capacity = data.capacity();
        if required <= capacity {
            return Ok(());
        }

        let fits = |cap: usize| others.checked_add(cap).is_some_and(|total| total <= limit);
        let doubled = capacity.saturating_mul(2).max(required);
        let target = if fits(doubled) {
            doubled
        } else if fits(required) {
            required
        } else {
            return Err(FsError::NoSpace);
        };

        data.try_reserve_exact(target - data.len())
            .map_err(|_| FsError::NoSpace)?;
        let capacity = data.capacity();
        self.allocated = others + capacity;
        Ok(())
    }
}

impl FileSystem for MemFs {
    fn fs_type(&self) -> FsType {
        FsType::Mem
    }

    fn open(&self, path: &FilePath, flags: OpenFlags) -> Result<Node, FsError> {
        let mut state = self.state.lock();

        let mut current = ROOT;
        let Some((last, parents)) = path.components.split_last() else {
            drop(state);
            return Ok(self.directory_node(ROOT));
        };
        for component in parents {
            current = state
                .child(current, component.as_str())?
                .ok_or(FsError::NotFound)?;
        }

        let id = match state.child(current, last.as_str())? {
            Some(id) => id,
            None if flags.contains(OpenFlags::CREATE) => {
                let node_type = if flags.contains(OpenFlags::DIRECTORY) {
                    NodeType::Directory
                } else {
                    NodeType::File
                };
                state.create(current, last.as_str(), node_type)?
            }
            None => return Err(FsError::NotFound),
        };

        let node_type = state.node(id).node_type();
        if flags.contains(OpenFlags::TRUNCATE) {
            if node_type == NodeType::Directory {
                return Err(FsError::IsADirectory);
            }
            state.truncate(id);
        }
        drop(state);

        Ok(match node_type {
            NodeType::Directory => self.directory_node(id),
            NodeType::File => Node::new(
                NodeType::File,
                Box::new(MemFileNode {
                    state: self.state.clone(),
                    id,
                    pos: 0,
                    append: flags.contains(OpenFlags::APPEND),
                }),
            ),
        })
    }
}

impl MemFs {
    fn directory_node(&self, id: NodeId) -> Node {
        Node::new(
            NodeType::Directory,
            Box::new(MemDirNode {
                state: self.state.clone(),
                id,
                cursor: 0,
            }),
        )
    }
}

#[derive(Debug)]
struct MemFileNode {
    state: Arc<Mutex<MemFsState>>,
    id: NodeId,
    pos: u64,
    append: bool,
}

impl NodeOps for MemFileNode {
    fn size(&self) -> u64 {
        self.state.lock().node(self.id).size()
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut state = self.state.lock();
        let data = state.file_mut(self.id);
        let Ok(pos) = usize::try_from(self.pos) else {
            return Ok(0);
        };
        if pos >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - pos);
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        let pos = if self.append {
            state.file_mut(self.id).len()
        } else {
            usize::try_from(self.pos).map_err(|_| FsError::NoSpace)?
        };
        let end = pos.checked_add(buf.len()).ok_or(FsError::NoSpace)?;

        state.reserve(self.id, end)?;
        let data = state.file_mut(self.id);
        if end > data.len() {
            data.resize(end, 0);
        }
        data[pos..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        self.pos = pos.resolve(self.pos, self.size())?;
        Ok(self.pos)
    }

    fn rewind_dir(&mut self) -> Result<(), FsError> {
        Err(FsError::NotADirectory)
    }

    fn read_dir(&mut self) -> Result<Option<DirEntry>, FsError> {
        Err(FsError::NotADirectory)
    }
}

#[derive(Debug)]
struct MemDirNode {
    state: Arc<Mutex<MemFsState>>,
    id: NodeId,
    cursor: usize,
}

impl NodeOps for MemDirNode {
    fn size(&self) -> u64 {
        0
    }

    fn tell(&self) -> u64 {
        self.cursor as u64
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, FsError> {
        Err(FsError::IsADirectory)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::IsADirectory)
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64, FsError> {
        Err(FsError::IsADirectory)
    }

    fn rewind_dir(&mut self) -> Result<(), FsError> {
        self.cursor = 0;
        Ok(())
    }

    fn read_dir(&mut self) -> Result<Option<DirEntry>, FsError> {
        let state = self.state.lock();
        let MemNodeKind::Directory(children) = &state.node(self.id).kind else {
            return Err(FsError::NotADirectory);
        };
        let Some(&child) = children.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let child = state.node(child);
        Ok(Some(DirEntry {
            name: child.name.clone(),
            node_type: child.node_type(),
            size: child.size(),
        }))
    }
}
