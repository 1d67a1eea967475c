mod cli;

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use flat_fs::{FileSystem, OpenMode};
use flat_fs_fuse::{to_io_error, BlockFile};

use self::cli::{Cli, Command};

fn main() -> io::Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Pack {
            source,
            image,
            blocks,
            inodes,
        } => pack(&source, &image, blocks, inodes),
        Command::Ls { image } => ls(&image),
        Command::Cat { image, name } => cat(&image, &name),
    }
}

fn pack(source: &Path, image: &Path, blocks: u32, inodes: u32) -> io::Result<()> {
    println!("source={source:?}\nimage={image:?}");

    let block_file = Arc::new(BlockFile::create(image, blocks)?);
    let fs = FileSystem::create(block_file, blocks, inodes).map_err(to_io_error)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            log::warn!("skip non UTF-8 file name {:?}", entry.file_name());
            continue;
        };

        let data = fs::read(entry.path())?;
        log::info!("file={name:?}, size={}", data.len());
        let file = fs.open(&name, OpenMode::Write).map_err(to_io_error)?;
        let written = fs.write(&file, &data);
        fs.close(file).map_err(to_io_error)?;
        written.map_err(to_io_error)?;
    }

    fs.sync().map_err(to_io_error)?;
    println!("{} blocks free", fs.free_blocks().len());
    Ok(())
}

fn ls(image: &Path) -> io::Result<()> {
    let fs = mount(image)?;
    let mut files = fs.list();
    files.sort_by(|a, b| a.name.cmp(&b.name));

    for file in &files {
        println!("{:>5} {:>8} {}", file.inumber, file.length, file.name);
    }
    println!(
        "{} files, {}/{} blocks free",
        files.len(),
        fs.free_blocks().len(),
        fs.total_blocks()
    );
    Ok(())
}

fn cat(image: &Path, name: &str) -> io::Result<()> {
    let fs = mount(image)?;
    let file = fs.open(name, OpenMode::Read).map_err(to_io_error)?;

    let mut data = vec![0; fs.size(&file).map_err(to_io_error)? as usize];
    let read = fs.read(&file, &mut data);
    fs.close(file).map_err(to_io_error)?;
    let len = read.map_err(to_io_error)?;

    io::stdout().lock().write_all(&data[..len])
}

fn mount(image: &Path) -> io::Result<FileSystem> {
    let (block_file, blocks) = BlockFile::open(image)?;
    FileSystem::mount(Arc::new(block_file), blocks).map_err(to_io_error)
}
