fn main() {
    fetcher::main();
}
