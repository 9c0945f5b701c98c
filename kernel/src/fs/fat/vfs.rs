use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use fat::{Cluster, ClusterCursor};

use crate::block::{BlockDevice, Sector};
use crate::vfs::{
    self, FilePath, FileSystem, FsError, FsType, MountError, Node, NodeOps, NodeType, OpenFlags,
    SeekFrom,
};

use super::volume::{zeroed_buffer, FatVolume};

/// Constructor for the VFS: recognises FAT12/16/32 volumes.
pub fn probe(
    device: &Arc<dyn BlockDevice>,
    start: u64,
    size: u64,
    scratch: &mut Sector,
) -> Result<Option<Arc<dyn FileSystem>>, MountError> {
    let Some(volume) = FatVolume::mount(device.clone(), start, size, scratch)? else {
        return Ok(None);
    };
    Ok(Some(Arc::new(FatFileSystem::new(volume))))
}

/// VFS interface into a FAT volume. Read only.
#[derive(Debug)]
pub struct FatFileSystem {
    volume: Arc<FatVolume>,
}

impl FatFileSystem {
    pub fn new(volume: FatVolume) -> Self {
        Self {
            volume: Arc::new(volume),
        }
    }
}

impl FileSystem for FatFileSystem {
    fn fs_type(&self) -> FsType {
        FsType::Fat
    }

    fn volume_label(&self) -> Option<String> {
        self.volume.label().map(String::from)
    }

    fn open(&self, path: &FilePath, flags: OpenFlags) -> Result<Node, FsError> {
        let entry = match self.volume.lookup(path) {
            Err(FsError::NotFound) if flags.contains(OpenFlags::CREATE) => {
                return Err(FsError::Unsupported)
            }
            result => result?,
        };
        if flags.contains(OpenFlags::TRUNCATE) {
            return Err(FsError::Unsupported);
        }

        let listing = match &entry {
            None => self.volume.root().to_vec(),
            Some(entry) if entry.is_dir() => self.volume.directory(entry.first_cluster)?,
            Some(entry) => {
                let file = FatFileNode::new(self.volume.clone(), entry)?;
                return Ok(Node::new(NodeType::File, Box::new(file)));
            }
        };
        let entries = listing
            .iter()
            .filter(|e| !e.is_dot_entry())
            .map(|e| vfs::DirEntry {
                name: e.name.clone(),
                node_type: if e.is_dir() {
                    NodeType::Directory
                } else {
                    NodeType::File
                },
                size: u64::from(e.size),
            })
            .collect();
        Ok(Node::new(
            NodeType::Directory,
            Box::new(FatDirNode { entries, cursor: 0 }),
        ))
    }
}

/// An open directory. The listing is read once at open time.
#[derive(Debug)]
struct FatDirNode {
    entries: Vec<vfs::DirEntry>,
    cursor: usize,
}

impl NodeOps for FatDirNode {
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

    fn read_dir(&mut self) -> Result<Option<vfs::DirEntry>, FsError> {
        let entry = self.entries.get(self.cursor).cloned();
        if entry.is_some() {
            self.cursor += 1;
        }
        Ok(entry)
    }
}

/// An open file. Holds one cluster of the file in memory; the cursor
/// remembers where in the chain that cluster is.
#[derive(Debug)]
struct FatFileNode {
    volume: Arc<FatVolume>,
    size: u64,
    pos: u64,
    /// `None` for empty files, which own no clusters.
    chain: Option<ClusterCursor>,
    buffer: Vec<u8>,
    /// Index within the chain of the cluster in `buffer`.
    buffered: Option<u64>,
}

impl FatFileNode {
    fn new(volume: Arc<FatVolume>, entry: &fat::DirEntry) -> Result<Self, FsError> {
        let chain = (entry.first_cluster.0 >= Cluster::FIRST.0)
            .then(|| ClusterCursor::new(entry.first_cluster));
        let buffer = zeroed_buffer(volume.geometry().cluster_bytes())?;
        Ok(Self {
            volume,
            size: u64::from(entry.size),
            pos: 0,
            chain,
            buffer,
            buffered: None,
        })
    }

    /// Makes `buffer` hold the `index`th cluster of the file.
    fn load(&mut self, index: u64) -> Result<(), FsError> {
        if self.buffered == Some(index) {
            return Ok(());
        }
        self.buffered = None;
        let chain = self
            .chain
            .as_mut()
            .ok_or(FsError::Corrupt("file has a size but no clusters"))?;
        let cluster = chain
            .seek(self.volume.table(), index)
            .ok_or(FsError::Corrupt("cluster chain is shorter than the file"))?;
        self.volume.read_cluster(cluster, &mut self.buffer)?;
        self.buffered = Some(index);
        Ok(())
    }
}

impl NodeOps for FatFileNode {
    fn size(&self) -> u64 {
        self.size
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let geometry = self.volume.geometry().clone();
        let mut done = 0;
        while done < buf.len() && self.pos < self.size {
            if let Err(e) = self.load(geometry.cluster_index(self.pos)) {
                // Hand back what was read; the error repeats on the next call.
                return if done > 0 { Ok(done) } else { Err(e) };
            }
            let offset = geometry.offset_in_cluster(self.pos);
            let left_in_file = usize::try_from(self.size - self.pos).unwrap_or(usize::MAX);
            let n = (buf.len() - done)
                .min(self.buffer.len() - offset)
                .min(left_in_file);
            buf[done..done + n].copy_from_slice(&self.buffer[offset..offset + n]);
            done += n;
            self.pos += n as u64;
        }
        Ok(done)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::Unsupported)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        self.pos = pos.resolve(self.pos, self.size)?;
        Ok(self.pos)
    }

    fn rewind_dir(&mut self) -> Result<(), FsError> {
        Err(FsError::NotADirectory)
    }

    fn read_dir(&mut self) -> Result<Option<vfs::DirEntry>, FsError> {
        Err(FsError::NotADirectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloc::vec;

    use crate::block::SECTOR_SIZE;
    use crate::testing::FatImageBuilder;
    use crate::vfs::{Device, VfsContext};

    fn path(s: &str) -> FilePath {
        FilePath::parse(s).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn fat_fs(image: &crate::testing::FatImage) -> Arc<dyn FileSystem> {
        let disk: Arc<dyn BlockDevice> = image.disk();
        let mut scratch = [0; SECTOR_SIZE];
        probe(&disk, 0, image.total_sectors(), &mut scratch)
            .unwrap()
            .unwrap()
    }

    fn names(node: &mut Node) -> Vec<String> {
        let mut names = Vec::new();
        while let Some(entry) = node.read_dir().unwrap() {
            names.push(entry.name);
        }
        names
    }

    #[test]
    fn reads_across_cluster_boundaries() {
        let data = pattern(5000);
        for builder in [
            FatImageBuilder::fat12(),
            FatImageBuilder::fat16(),
            FatImageBuilder::fat32(),
        ] {
            let image = builder.fragmented().file("/BIG.BIN", &data).build();
            let fs = fat_fs(&image);
            let mut file = fs.open(&path("/BIG.BIN"), OpenFlags::empty()).unwrap();
            assert_eq!(file.size(), 5000);

            // Odd sized reads so chunks straddle clusters.
            let mut read = Vec::new();
            let mut chunk = [0; 333];
            loop {
                let n = file.read(&mut chunk).unwrap();
                if n == 0 {
                    break;
                }
                read.extend_from_slice(&chunk[..n]);
            }
            assert_eq!(read, data);
            assert_eq!(file.tell(), 5000);
        }
    }

    #[test]
    fn seeks_backwards_and_forwards() {
        let data = pattern(3000);
        let image = FatImageBuilder::fat12()
            .fragmented()
            .file("/SEEK.BIN", &data)
            .build();
        let fs = fat_fs(&image);
        let mut file = fs.open(&path("/SEEK.BIN"), OpenFlags::empty()).unwrap();

        let mut buf = [0; 4];
        for offset in [2500_u64, 10, 511, 512, 1024, 0, 2999] {
            assert_eq!(file.seek(SeekFrom::Start(offset)), Ok(offset));
            let n = file.read(&mut buf).unwrap();
            let start = offset as usize;
            let end = (start + 4).min(data.len());
            assert_eq!(&buf[..n], &data[start..end]);
        }

        assert_eq!(file.seek(SeekFrom::End(-1)), Ok(2999));
        assert_eq!(file.seek(SeekFrom::Current(-2999)), Ok(0));
        assert_eq!(file.seek(SeekFrom::Current(-1)), Err(FsError::InvalidSeek));
    }

    #[test]
    fn reads_at_eof_return_zero() {
        let image = FatImageBuilder::fat16()
            .file("/SMALL.TXT", b"tiny")
            .file("/EMPTY.TXT", b"")
            .build();
        let fs = fat_fs(&image);

        let mut small = fs.open(&path("/SMALL.TXT"), OpenFlags::empty()).unwrap();
        let mut buf = [0; 32];
        assert_eq!(small.read(&mut buf), Ok(4));
        assert_eq!(small.read(&mut buf), Ok(0));
        small.seek(SeekFrom::Start(100)).unwrap();
        assert_eq!(small.read(&mut buf), Ok(0));

        let mut empty = fs.open(&path("/EMPTY.TXT"), OpenFlags::empty()).unwrap();
        assert_eq!(empty.size(), 0);
        assert_eq!(empty.read(&mut buf), Ok(0));
    }

    #[test]
    fn sequential_reads_reuse_the_cluster_buffer() {
        let image = FatImageBuilder::fat16().file("/A.BIN", &pattern(2048)).build();
        let disk = image.disk();
        let dyn_disk: Arc<dyn BlockDevice> = disk.clone();
        let mut scratch = [0; SECTOR_SIZE];
        let fs = probe(&dyn_disk, 0, 0, &mut scratch).unwrap().unwrap();
        let mut file = fs.open(&path("/A.BIN"), OpenFlags::empty()).unwrap();

        let before = disk.reads();
        let mut byte = [0; 1];
        for _ in 0..2048 {
            assert_eq!(file.read(&mut byte), Ok(1));
        }
        // One 2 KiB cluster is four sectors, read once.
        assert_eq!(disk.reads() - before, 4);
    }

    #[test]
    fn broken_chain_is_corrupt() {
        let mut image = FatImageBuilder::fat12().file("/CUT.BIN", &pattern(1500)).build();
        let second = image.chain("/CUT.BIN")[1];
        image.table_mut().set_raw_entry(second.0, 0);
        let fs = fat_fs(&image);
        let mut file = fs.open(&path("/CUT.BIN"), OpenFlags::empty()).unwrap();

        let mut buf = vec![0; 1500];
        // The first two clusters come back, then the chain ends early.
        assert_eq!(file.read(&mut buf), Ok(1024));
        assert_eq!(
            file.read(&mut buf),
            Err(FsError::Corrupt("cluster chain is shorter than the file"))
        );
    }

    #[test]
    fn long_names_in_listing_and_lookup() {
        let image = FatImageBuilder::fat12()
            .file("/areallylongfilename.txt", b"long name")
            .file("/SHORT.TXT", b"short")
            .build();
        let fs = fat_fs(&image);

        let mut root = fs.open(&FilePath::root(), OpenFlags::empty()).unwrap();
        assert_eq!(names(&mut root), ["areallylongfilename.txt", "SHORT.TXT"]);

        let mut file = fs
            .open(&path("/areallylongfilename.txt"), OpenFlags::empty())
            .unwrap();
        assert_eq!(file.read_to_end().unwrap(), b"long name");
    }

    #[test]
    fn subdirectory_listing_hides_dot_entries() {
        let image = FatImageBuilder::fat16()
            .dir("/DEMOS")
            .file("/DEMOS/FIRE.COM", b"f")
            .dir("/DEMOS/SUB")
            .build();
        let fs = fat_fs(&image);
        let mut demos = fs.open(&path("/demos"), OpenFlags::empty()).unwrap();
        assert!(demos.is_dir());
        assert_eq!(names(&mut demos), ["FIRE.COM", "SUB"]);
        demos.rewind_dir().unwrap();
        let first = demos.read_dir().unwrap().unwrap();
        assert_eq!((first.node_type, first.size), (NodeType::File, 1));
    }

    #[test]
    fn path_through_a_file_is_not_a_directory() {
        let image = FatImageBuilder::fat12()
            .dir("/A")
            .file("/A/B", b"b")
            .build();
        let fs = fat_fs(&image);
        assert_eq!(
            fs.open(&path("/A/B/C"), OpenFlags::empty()).unwrap_err(),
            FsError::NotADirectory
        );
    }

    #[test]
    fn writes_are_unsupported() {
        let image = FatImageBuilder::fat12().file("/RO.TXT", b"ro").build();
        let fs = fat_fs(&image);
        let mut file = fs.open(&path("/RO.TXT"), OpenFlags::empty()).unwrap();
        assert_eq!(file.write(b"x"), Err(FsError::Unsupported));
        assert_eq!(file.read_dir(), Err(FsError::NotADirectory));
        assert_eq!(
            fs.open(&path("/NEW.TXT"), OpenFlags::CREATE).unwrap_err(),
            FsError::Unsupported
        );
        assert_eq!(
            fs.open(&path("/RO.TXT"), OpenFlags::TRUNCATE).unwrap_err(),
            FsError::Unsupported
        );
        assert_eq!(
            fs.open(&path("/NEW.TXT"), OpenFlags::empty()).unwrap_err(),
            FsError::NotFound
        );

        let mut root = fs.open(&FilePath::root(), OpenFlags::empty()).unwrap();
        assert_eq!(root.read(&mut [0; 1]), Err(FsError::IsADirectory));
    }

    #[test]
    fn two_contexts_mount_independently() {
        let first = FatImageBuilder::fat12().file("/ONE.TXT", b"one").build();
        let second = FatImageBuilder::fat32().file("/TWO.TXT", b"two").build();

        let mut contexts: Vec<VfsContext> = Vec::new();
        for image in [&first, &second] {
            let mut vfs = VfsContext::new();
            vfs.mount(Device::Block(image.disk()), 0, image.total_sectors(), None)
                .unwrap();
            contexts.push(vfs);
        }

        let read = |vfs: &VfsContext, p: &str| {
            vfs.open(p, OpenFlags::empty())
                .map(|mut node| node.read_to_end().unwrap())
        };
        assert_eq!(read(&contexts[0], "/one.txt").unwrap(), b"one");
        assert_eq!(read(&contexts[1], "/two.txt").unwrap(), b"two");
        assert_eq!(read(&contexts[0], "/two.txt").unwrap_err(), FsError::NotFound);
        assert_eq!(contexts[1].root().unwrap().volume_label(), None);
    }
}
