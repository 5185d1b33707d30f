use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "website-cloner",
    about = "Clone a website into a folder you can browse offline",
    version,
    long_about = "Crawls every page of a website reachable from the given URL, downloads the \
                  images, stylesheets, scripts and fonts they use, and rewrites all links so \
                  the copy in <output-dir>/<domain>/ works offline."
)]
pub struct MirrorCommand {
    /// The URL of the website to clone
    #[arg(required = true)]
    pub url: String,

    /// Directory the <domain>/ folder is created in
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Clone only the given page instead of the whole site
    #[arg(short, long)]
    pub single_page: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase diagnostic output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only show errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl MirrorCommand {
    pub fn follow_all(&self) -> bool {
        !self.single_page
    }
}
