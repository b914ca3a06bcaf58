use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use forum_reader::models::{NewThread, RegisterPayload, Votable, VoteType};
use forum_reader::render::{excerpt, html_to_text};
use forum_reader::{ClientConfig, ForumClient};

#[derive(Parser, Debug)]
#[command(name = "forum-reader")]
#[command(about = "Terminal client for the Dicoding forum API")]
struct Args {
    /// API base URL (overrides FORUM_API_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Directory holding the session database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "FORUM_PASSWORD")]
        password: String,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "FORUM_PASSWORD")]
        password: String,
    },
    Logout,
    /// Check whether the stored session still works
    Session,
    Me,
    Users,
    Threads {
        #[arg(long)]
        category: Option<String>,
    },
    Thread {
        id: String,
    },
    PostThread {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        #[arg(long, default_value = "")]
        category: String,
    },
    Comment {
        thread_id: String,
        content: String,
    },
    VoteThread {
        thread_id: String,
        vote: VoteType,
    },
    VoteComment {
        thread_id: String,
        comment_id: String,
        vote: VoteType,
    },
    Leaderboards,
}

async fn show_threads(client: &ForumClient, category: Option<String>) -> Result<()> {
    let (users, threads) = client.populate_users_and_threads().await?;
    let names: HashMap<&str, &str> = users.iter().map(|u| (u.id.as_str(), u.name.as_str())).collect();

    let wanted = category.map(|c| c.to_lowercase());
    for thread in threads
        .iter()
        .filter(|t| wanted.as_ref().map_or(true, |c| t.category.to_lowercase() == *c))
    {
        let author = names.get(thread.owner_id.as_str()).copied().unwrap_or("unknown");
        println!(
            "{}  [{}] {}\n    by {} · {} · {:+} votes · {} comments\n    {}",
            thread.id,
            thread.category,
            thread.title,
            author,
            thread.created_at.format("%Y-%m-%d %H:%M"),
            thread.score(),
            thread.total_comments,
            excerpt(&html_to_text(&thread.body), 100),
        );
    }
    Ok(())
}

async fn show_thread(client: &ForumClient, id: &str) -> Result<()> {
    let detail = client.see_detail_thread(id).await?;

    println!("{} [{}]", detail.title, detail.category);
    println!(
        "by {} · {} · {:+} votes\n",
        detail.owner.name,
        detail.created_at.format("%Y-%m-%d %H:%M"),
        detail.score()
    );
    println!("{}\n", html_to_text(&detail.body));

    println!("{} comments", detail.comments.len());
    for comment in &detail.comments {
        println!(
            "\n  {} · {} · {:+} votes ({})",
            comment.owner.name,
            comment.created_at.format("%Y-%m-%d %H:%M"),
            comment.score(),
            comment.id
        );
        for line in html_to_text(&comment.content).lines() {
            println!("    {}", line);
        }
    }
    Ok(())
}

async fn run(client: &ForumClient, command: Command) -> Result<()> {
    match command {
        Command::Register { name, email, password } => {
            let user = client.register(&RegisterPayload { name, email, password }).await?;
            println!("Registered {} <{}> ({})", user.name, user.email, user.id);
        }
        Command::Login { email, password } => {
            let user = client.sign_in(&email, &password).await?;
            println!("Signed in as {} ({})", user.name, user.id);
        }
        Command::Logout => {
            client.sign_out()?;
            println!("Signed out");
        }
        Command::Session => match client.restore_session().await? {
            Some(user) => println!("Signed in as {} ({})", user.name, user.id),
            None => println!("Not signed in"),
        },
        Command::Me => {
            let user = client.get_own_profile().await?;
            println!("{} <{}> ({})", user.name, user.email, user.id);
        }
        Command::Users => {
            for user in client.get_all_users().await? {
                println!("{}  {} <{}>", user.id, user.name, user.email);
            }
        }
        Command::Threads { category } => show_threads(client, category).await?,
        Command::Thread { id } => show_thread(client, &id).await?,
        Command::PostThread { title, body, category } => {
            let thread = client.create_thread(&NewThread { title, body, category }).await?;
            println!("Created thread {}", thread.id);
        }
        Command::Comment { thread_id, content } => {
            let comment = client.create_comment(&thread_id, &content).await?;
            println!("Commented {} on {}", comment.id, thread_id);
        }
        Command::VoteThread { thread_id, vote } => {
            let confirmed = client.vote_thread(&thread_id, vote).await?;
            println!("Vote on {} is now {}", thread_id, confirmed.vote_type);
        }
        Command::VoteComment { thread_id, comment_id, vote } => {
            let confirmed = client.vote_comment(&thread_id, &comment_id, vote).await?;
            println!("Vote on {} is now {}", comment_id, confirmed.vote_type);
        }
        Command::Leaderboards => {
            for (rank, item) in client.see_leaderboards().await?.iter().enumerate() {
                println!("{:>3}. {:<30} {:>5}", rank + 1, item.user.name, item.score);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::from_env().context("Invalid configuration")?;
    if let Some(url) = &args.base_url {
        config = config.with_base_url(url);
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }

    let client = ForumClient::from_config(config).context("Failed to set up forum client")?;

    tokio::select! {
        result = run(&client, args.command) => result,
        _ = tokio::signal::ctrl_c() => {
            client.cancel_all_pending();
            anyhow::bail!("interrupted");
        }
    }
}
